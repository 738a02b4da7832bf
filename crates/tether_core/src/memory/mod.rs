//! # Memory Management
//!
//! Generational storage for objects owned by the control thread.

mod slots;

pub use slots::{SlotKey, SlotTable};
