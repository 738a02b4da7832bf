//! # TETHER Scene
//!
//! Binds control-thread scene objects to records in a batched entity store.
//!
//! A scene object is represented by a [`SceneObjectEntity`] wrapper that moves
//! through a small lifecycle state machine. While its record does not exist
//! yet, every read and write goes through a pending command set keyed by a
//! placeholder; once the record is allocated, writes go through an instance
//! overlay played back at the next synchronization point. Records shared by
//! several wrappers are reference counted and destroyed when the last owner
//! leaves.
//!
//! ## Architecture Rules
//!
//! 1. **Lifecycle calls never touch records** - records are allocated,
//!    flushed and destroyed only inside [`SceneWorld::reconcile`]
//! 2. **Callers always read their own writes** - reads merge instance
//!    overlay > pending set > record
//! 3. **Cross-thread handoff is lock-free** - see [`LifecycleQueues`]
//! 4. **Broken counters are loud** - an underflow halts the record and is
//!    returned as [`LifecycleError::CounterUnderflow`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_scene::{AttachOptions, ContextId, ContextTable, DescriptorTable, SceneConfig, SceneWorld};
//!
//! let mut world = SceneWorld::with_record_store(SceneConfig::default(), descriptors, contexts)?;
//! let token = world.attach(AttachOptions::new(ContextId(0)))?;
//! world.set(token, Health { value: 100 })?;          // queued while Creating
//! world.reconcile()?;                                 // record allocated, Created
//! assert_eq!(world.get::<Health>(token)?, Health { value: 100 });
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

mod access;
pub mod callbacks;
pub mod config;
pub mod context;
pub mod counters;
pub mod error;
pub mod overlay;
pub mod queues;
pub mod reconcile;
pub mod remap;
pub mod status;
pub mod world;
pub mod wrapper;

pub use callbacks::{CallbackChannel, Materialized, OnCreated};
pub use config::SceneConfig;
pub use context::{ContextId, ContextReadiness, ContextState, ContextTable, DescriptorSource, DescriptorTable};
pub use counters::Counter;
pub use error::{LifecycleError, LifecycleResult};
pub use overlay::{Command, CommandQueue, PendingCommandSet, Target};
pub use queues::{DisposalRecord, LifecycleQueues};
pub use reconcile::{ReconcileReport, SceneStats};
pub use remap::RemapSettings;
pub use status::LifecycleState;
pub use world::{AttachOptions, SceneWorld};
pub use wrapper::{PersistedIdentity, SceneObjectEntity, TemplateKey, WrapperToken};
