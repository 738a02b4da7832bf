//! # TETHER Core
//!
//! The leaf layer of the scene-object / entity-store bridge:
//! - Entity handles with generation counters and provisional placeholders
//! - The [`EntityStore`] collaborator trait and a dense [`RecordStore`]
//! - Generational [`SlotTable`]s for control-thread owned objects
//! - Lock-free [`AtomicStack`]s for cross-thread lifecycle handoff
//!
//! ## Architecture Rules
//!
//! 1. **Values cross the store boundary as bytes** - components are `Pod`
//! 2. **Handles are checked, never trusted** - every access compares generations
//! 3. **No mutex on the handoff path** - stacks use compare-and-swap only
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_core::{ArchetypeDescriptor, EntityStore, RecordStore};
//!
//! let mut store = RecordStore::new(1024);
//! let record = store.allocate_record(&ArchetypeDescriptor::empty())?;
//! assert!(store.is_alive(record));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod ecs;
pub mod error;
pub mod memory;
pub mod sync;

pub use ecs::{
    content_hash_of, ActiveCount, ArchetypeDescriptor, BufferElement, BufferView, Component,
    ComponentId, ComponentKind, ComponentLayout, Entity, EntityId, EntityParent, EntityStore,
    InstanceCount, RawBuffer, RecordStore, MAX_COMPONENTS, PLACEHOLDER_BIT,
};
pub use error::{StoreError, StoreResult};
pub use memory::{SlotKey, SlotTable};
pub use sync::{AtomicStack, Drain, Node};
