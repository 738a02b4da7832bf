//! # Entity Records
//!
//! Handles, component descriptions and the batched record store the
//! lifecycle layer writes through.
//!
//! ## Design Philosophy
//!
//! - Record slots are pre-allocated at store creation
//! - Field columns are dense arrays indexed by slot
//! - Handles carry a generation counter and are checked on every access
//! - Provisional identities live in a reserved index range and never resolve

mod component;
pub mod descriptor;
mod entity;
mod storage;
mod store;
mod world;

pub use component::{
    ActiveCount, BufferElement, Component, ComponentId, ComponentKind, ComponentLayout,
    EntityParent, InstanceCount, MAX_COMPONENTS,
};
pub use descriptor::{content_hash_of, ArchetypeDescriptor};
pub use entity::{Entity, EntityId, PLACEHOLDER_BIT};
pub use storage::{BufferView, RawBuffer};
pub use store::EntityStore;
pub use world::RecordStore;
