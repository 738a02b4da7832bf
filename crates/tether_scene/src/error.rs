//! # Lifecycle Error Types
//!
//! All errors the lifecycle bridge reports to control-thread callers.

use tether_core::{ComponentId, EntityId, StoreError};
use thiserror::Error;

use crate::status::LifecycleState;

/// Errors that can occur while driving wrapper lifecycles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// A data operation was issued outside `Creating` / `Created`.
    #[error("cannot {operation} while wrapper is {status}")]
    InvalidLifecycleState {
        /// Status the wrapper was in.
        status: LifecycleState,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// Rebuild was requested while the record is still being materialized.
    #[error("cannot rebuild a wrapper that is still creating its record")]
    RebuildWhileCreating,

    /// A reference counter was decremented past zero (double dispose).
    #[error("{counter} underflow on record {entity:?}")]
    CounterUnderflow {
        /// Counter component name.
        counter: &'static str,
        /// Record (or placeholder) whose counter underflowed.
        entity: EntityId,
    },

    /// A parent link has stayed unresolved for too many passes.
    #[error("parent link of record {child:?} unresolved after {passes} passes")]
    UnresolvedParent {
        /// Child record carrying the dirty link.
        child: EntityId,
        /// Passes the link has been dirty.
        passes: u32,
    },

    /// A non-`try` getter found no value for the component.
    #[error("component {component} is not present on the wrapper's record")]
    MissingRecordField {
        /// Component that was read.
        component: ComponentId,
    },

    /// The wrapper token no longer resolves.
    #[error("wrapper token is stale")]
    StaleWrapper,

    /// The entity store has no free record slot.
    #[error("entity store exhausted: capacity {capacity}")]
    StoreExhausted {
        /// Store capacity.
        capacity: usize,
    },

    /// Any other entity-store failure.
    #[error("entity store error: {0}")]
    Store(StoreError),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<StoreError> for LifecycleError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Exhausted { capacity } => Self::StoreExhausted { capacity },
            other => Self::Store(other),
        }
    }
}

impl LifecycleError {
    /// Whether the error reports a broken invariant rather than misuse.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::CounterUnderflow { .. } | Self::Store(_))
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
