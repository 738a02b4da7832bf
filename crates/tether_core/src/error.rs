//! # Store Error Types
//!
//! All errors the record store can report back to the lifecycle layer.

use thiserror::Error;

use crate::ecs::{ComponentId, ComponentKind, EntityId};

/// Errors that can occur while touching records in an entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Every pre-allocated record slot is in use.
    #[error("record store exhausted: capacity {capacity}")]
    Exhausted {
        /// Configured capacity of the store.
        capacity: usize,
    },

    /// The handle is null, a placeholder, or refers to a recycled slot.
    #[error("stale or unknown record handle: {0:?}")]
    StaleHandle(EntityId),

    /// A field operation was issued against a buffer column or vice versa.
    #[error("component {component} is a {actual:?}, not a {expected:?}")]
    KindMismatch {
        /// Component type involved.
        component: ComponentId,
        /// Kind the caller asked for.
        expected: ComponentKind,
        /// Kind the column was registered with.
        actual: ComponentKind,
    },

    /// Value bytes do not match the registered component size.
    #[error("component {component} expects {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Component type involved.
        component: ComponentId,
        /// Registered size in bytes.
        expected: usize,
        /// Size supplied by the caller.
        actual: usize,
    },

    /// The record does not carry the requested component.
    #[error("record {entity:?} has no component {component}")]
    MissingComponent {
        /// Record that was queried.
        entity: EntityId,
        /// Component type that was missing.
        component: ComponentId,
    },

    /// Component identifiers are limited to the record bitmask width.
    #[error("component id {0} out of range")]
    InvalidComponentId(ComponentId),
}

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;
