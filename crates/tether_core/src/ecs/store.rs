//! # Entity Store Interface
//!
//! The narrow surface the lifecycle layer consumes from whatever batched
//! record store backs it. Values cross this boundary as plain bytes, so the
//! trait stays object safe and overlays can queue writes without knowing the
//! concrete component type.
//!
//! Implementations are externally synchronized: the lifecycle layer only
//! touches the store from the control thread or while it holds the store
//! exclusively during a reconciliation pass.

use super::component::{ComponentId, ComponentLayout};
use super::descriptor::ArchetypeDescriptor;
use super::entity::EntityId;
use super::storage::BufferView;
use crate::error::StoreResult;

/// Batched record store consumed by the lifecycle layer.
pub trait EntityStore: Send {
    /// Allocates a record carrying every component of `descriptor`, zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exhausted`](crate::StoreError::Exhausted) when no slot is free.
    fn allocate_record(&mut self, descriptor: &ArchetypeDescriptor) -> StoreResult<EntityId>;

    /// Destroys a record. Returns `false` for stale or unknown handles.
    fn destroy_record(&mut self, id: EntityId) -> bool;

    /// Whether the handle names a live record.
    fn is_alive(&self, id: EntityId) -> bool;

    /// Number of live records.
    fn alive_count(&self) -> usize;

    /// Whether the record carries the component (field or buffer).
    fn has_field(&self, id: EntityId, component: ComponentId) -> bool;

    /// Adds a zeroed component to a live record. Adding a present component is a no-op.
    ///
    /// # Errors
    ///
    /// Fails on stale handles or when the layout conflicts with the registered column.
    fn add_field(&mut self, id: EntityId, layout: ComponentLayout) -> StoreResult<()>;

    /// Removes a component. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Fails on stale handles.
    fn remove_field(&mut self, id: EntityId, component: ComponentId) -> StoreResult<bool>;

    /// Reads a field value, `None` if absent.
    fn get_field(&self, id: EntityId, component: ComponentId) -> Option<&[u8]>;

    /// Writes a field value, adding the component when absent.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, kind or size mismatches.
    fn set_field(&mut self, id: EntityId, component: ComponentId, bytes: &[u8]) -> StoreResult<()>;

    /// Reads a buffer, `None` if absent.
    fn buffer(&self, id: EntityId, component: ComponentId) -> Option<BufferView<'_>>;

    /// Appends elements, adding the buffer when absent.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, kind or size mismatches.
    fn append_buffer(
        &mut self,
        id: EntityId,
        layout: ComponentLayout,
        values: &[u8],
        unique: bool,
    ) -> StoreResult<usize>;

    /// Swap-removes the first occurrence of each element.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, kind or size mismatches.
    fn remove_buffer(&mut self, id: EntityId, layout: ComponentLayout, values: &[u8]) -> StoreResult<usize>;

    /// Replaces the buffer contents, adding the buffer when absent.
    ///
    /// # Errors
    ///
    /// Fails on stale handles, kind or size mismatches.
    fn set_buffer(&mut self, id: EntityId, layout: ComponentLayout, values: &[u8]) -> StoreResult<()>;

    /// Sets the enabled flag of a present component.
    ///
    /// # Errors
    ///
    /// Fails on stale handles or when the component is absent.
    fn set_enabled(&mut self, id: EntityId, component: ComponentId, enabled: bool) -> StoreResult<()>;

    /// Enabled flag of a component, `None` if the record or component is absent.
    fn is_enabled(&self, id: EntityId, component: ComponentId) -> Option<bool>;

    /// Suspends or resumes a whole record.
    ///
    /// # Errors
    ///
    /// Fails on stale handles.
    fn set_suspended(&mut self, id: EntityId, suspended: bool) -> StoreResult<()>;

    /// Suspension flag, `None` for stale handles.
    fn is_suspended(&self, id: EntityId) -> Option<bool>;

    /// Every live record whose component is present and enabled.
    fn records_with_enabled(&self, component: ComponentId) -> Vec<EntityId>;
}
