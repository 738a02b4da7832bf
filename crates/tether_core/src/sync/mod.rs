//! # Lock-Free Handoff
//!
//! ## The Problem
//!
//! ```text
//! Any thread:      finalizer / loader pushes a lifecycle request
//! Control thread:  reconciliation pass drains every request
//!
//! With Mutex:      finalizers block behind the pass
//! ```
//!
//! ## The Solution: Intrusive Treiber Stack
//!
//! ```text
//! push:   CAS head from old -> new node
//! drain:  SWAP head with null, walk the detached chain
//! ```
//!
//! Producers never wait on the consumer and the consumer never waits on
//! producers. Nodes can be recycled through a second stack to keep the
//! steady state allocation free.

mod atomic_stack;

pub use atomic_stack::{AtomicStack, Drain, Node};
