//! # Record Store
//!
//! The reference [`EntityStore`]: a fixed-capacity container of record slots
//! and type-erased component columns. All slot headers are pre-allocated at
//! creation; field columns are allocated the first time a component id is
//! seen.

use super::component::{BufferElement, Component, ComponentId, ComponentKind, ComponentLayout, MAX_COMPONENTS};
use super::descriptor::ArchetypeDescriptor;
use super::entity::{Entity, EntityId, PLACEHOLDER_BIT};
use super::storage::{BufferView, FieldColumn, RawBuffer};
use super::store::EntityStore;
use crate::error::{StoreError, StoreResult};

/// Type-erased column for one component id.
enum Column {
    Field(FieldColumn),
    Buffer { stride: usize, buffers: Box<[RawBuffer]> },
}

impl Column {
    fn kind(&self) -> ComponentKind {
        match self {
            Self::Field(_) => ComponentKind::Field,
            Self::Buffer { .. } => ComponentKind::Buffer,
        }
    }

    fn stride(&self) -> usize {
        match self {
            Self::Field(column) => column.stride(),
            Self::Buffer { stride, .. } => *stride,
        }
    }

    fn reset(&mut self, index: usize) {
        match self {
            Self::Field(column) => column.reset(index),
            Self::Buffer { buffers, .. } => {
                if let Some(buffer) = buffers.get_mut(index) {
                    buffer.clear();
                }
            }
        }
    }
}

/// Dense record store with generation-checked handles.
///
/// # Capacity
///
/// The store has a fixed capacity set at creation; allocation fails with
/// [`StoreError::Exhausted`] once every slot is in use.
///
/// # Example
///
/// ```rust,ignore
/// let mut store = RecordStore::new(1_000);
///
/// let record = store.allocate_record(&descriptor)?;
/// store.set_field(record, Health::ID, bytemuck::bytes_of(&Health { value: 10 }))?;
/// ```
pub struct RecordStore {
    /// All record slots (pre-allocated).
    entities: Box<[Entity]>,
    /// Free list of slot indices for reuse.
    free_indices: Vec<u32>,
    /// Number of currently alive records.
    alive_count: usize,
    /// Maximum capacity.
    capacity: usize,
    /// One optional column per component id.
    columns: Vec<Option<Column>>,
}

impl RecordStore {
    /// Creates a new store with the specified record capacity.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero or collides with the placeholder index bit.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");
        assert!(
            capacity <= PLACEHOLDER_BIT as usize,
            "Capacity cannot reach the placeholder index range"
        );

        let entities = (0..capacity)
            .map(|_| Entity::dead())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        #[allow(clippy::cast_possible_truncation)]
        let free_indices: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            entities,
            free_indices,
            alive_count: 0,
            capacity,
            columns: (0..MAX_COMPONENTS).map(|_| None).collect(),
        }
    }

    /// Returns the maximum capacity of this store.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the slot header of a live record.
    #[inline]
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slot(id).map(|index| &self.entities[index])
    }

    /// Iterates over all alive record headers.
    pub fn iter_alive(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.alive)
    }

    /// Typed field read.
    #[must_use]
    pub fn component<C: Component>(&self, id: EntityId) -> Option<C> {
        self.get_field(id, C::ID)
            .filter(|bytes| bytes.len() == std::mem::size_of::<C>())
            .map(bytemuck::pod_read_unaligned)
    }

    /// Typed buffer read.
    #[must_use]
    pub fn buffer_of<B: BufferElement>(&self, id: EntityId) -> Option<Vec<B>> {
        self.buffer(id, B::ID).map(|view| view.to_vec())
    }

    /// Resolves a handle to its slot index if it is live and current.
    fn slot(&self, id: EntityId) -> Option<usize> {
        if !id.is_record() {
            return None;
        }

        let idx = id.index() as usize;
        let entity = self.entities.get(idx)?;
        (entity.alive && entity.id.generation() == id.generation()).then_some(idx)
    }

    fn live_slot(&self, id: EntityId) -> StoreResult<usize> {
        self.slot(id).ok_or(StoreError::StaleHandle(id))
    }

    /// Returns the column for `layout`, creating it on first use.
    fn column_for(&mut self, layout: ComponentLayout) -> StoreResult<&mut Column> {
        let capacity = self.capacity;
        let entry = self
            .columns
            .get_mut(layout.id as usize)
            .ok_or(StoreError::InvalidComponentId(layout.id))?;

        let column = entry.get_or_insert_with(|| match layout.kind {
            ComponentKind::Field => Column::Field(FieldColumn::new(layout.size, capacity)),
            ComponentKind::Buffer => Column::Buffer {
                stride: layout.size,
                buffers: (0..capacity).map(|_| RawBuffer::default()).collect(),
            },
        });

        if column.kind() != layout.kind {
            return Err(StoreError::KindMismatch {
                component: layout.id,
                expected: layout.kind,
                actual: column.kind(),
            });
        }
        if column.stride() != layout.size {
            return Err(StoreError::SizeMismatch {
                component: layout.id,
                expected: column.stride(),
                actual: layout.size,
            });
        }
        Ok(column)
    }

    /// Resolves the buffer of a live record, attaching the component if needed.
    fn buffer_mut(&mut self, id: EntityId, layout: ComponentLayout) -> StoreResult<&mut RawBuffer> {
        let idx = self.live_slot(id)?;
        if layout.kind != ComponentKind::Buffer {
            return Err(StoreError::KindMismatch {
                component: layout.id,
                expected: ComponentKind::Buffer,
                actual: layout.kind,
            });
        }
        let newly_added = !self.entities[idx].has_component(layout.id);
        self.column_for(layout)?;
        if newly_added {
            self.entities[idx].add_component(layout.id);
        }
        match self.columns.get_mut(layout.id as usize) {
            Some(Some(Column::Buffer { buffers, .. })) => {
                let buffer = &mut buffers[idx];
                if newly_added {
                    buffer.clear();
                }
                Ok(buffer)
            }
            _ => Err(StoreError::InvalidComponentId(layout.id)),
        }
    }

    fn check_size(layout: ComponentLayout, values: &[u8]) -> StoreResult<()> {
        if layout.size == 0 || values.len() % layout.size != 0 {
            return Err(StoreError::SizeMismatch {
                component: layout.id,
                expected: layout.size,
                actual: values.len(),
            });
        }
        Ok(())
    }
}

impl EntityStore for RecordStore {
    fn allocate_record(&mut self, descriptor: &ArchetypeDescriptor) -> StoreResult<EntityId> {
        for layout in descriptor.layouts() {
            self.column_for(*layout)?;
        }

        let Some(index) = self.free_indices.pop() else {
            return Err(StoreError::Exhausted {
                capacity: self.capacity,
            });
        };

        let idx = index as usize;
        let entity = &mut self.entities[idx];

        // Increment generation to invalidate old references
        let generation = entity.id.generation().wrapping_add(1);
        let new_id = EntityId::new(index, generation);

        *entity = Entity::new(new_id);
        for layout in descriptor.layouts() {
            entity.add_component(layout.id);
        }
        self.alive_count += 1;

        Ok(new_id)
    }

    fn destroy_record(&mut self, id: EntityId) -> bool {
        let Some(idx) = self.slot(id) else {
            return false;
        };

        let mask = self.entities[idx].component_mask;
        let entity = &mut self.entities[idx];
        entity.alive = false;
        entity.component_mask = 0;
        entity.enabled_mask = 0;
        entity.suspended = false;
        self.alive_count -= 1;
        self.free_indices.push(id.index());

        for (component, column) in self.columns.iter_mut().enumerate() {
            if mask & (1u64 << component) == 0 {
                continue;
            }
            if let Some(column) = column {
                column.reset(idx);
            }
        }

        true
    }

    #[inline]
    fn is_alive(&self, id: EntityId) -> bool {
        self.slot(id).is_some()
    }

    #[inline]
    fn alive_count(&self) -> usize {
        self.alive_count
    }

    fn has_field(&self, id: EntityId, component: ComponentId) -> bool {
        self.get(id).is_some_and(|entity| entity.has_component(component))
    }

    fn add_field(&mut self, id: EntityId, layout: ComponentLayout) -> StoreResult<()> {
        let idx = self.live_slot(id)?;
        if self.entities[idx].has_component(layout.id) {
            return Ok(());
        }
        self.column_for(layout)?.reset(idx);
        self.entities[idx].add_component(layout.id);
        Ok(())
    }

    fn remove_field(&mut self, id: EntityId, component: ComponentId) -> StoreResult<bool> {
        let idx = self.live_slot(id)?;
        if !self.entities[idx].has_component(component) {
            return Ok(false);
        }
        self.entities[idx].remove_component(component);
        if let Some(Some(column)) = self.columns.get_mut(component as usize) {
            column.reset(idx);
        }
        Ok(true)
    }

    fn get_field(&self, id: EntityId, component: ComponentId) -> Option<&[u8]> {
        let idx = self.slot(id)?;
        if !self.entities[idx].has_component(component) {
            return None;
        }
        match self.columns.get(component as usize)? {
            Some(Column::Field(column)) => column.read(idx),
            _ => None,
        }
    }

    fn set_field(&mut self, id: EntityId, component: ComponentId, bytes: &[u8]) -> StoreResult<()> {
        let idx = self.live_slot(id)?;
        let layout = ComponentLayout {
            id: component,
            kind: ComponentKind::Field,
            size: bytes.len(),
        };
        let Column::Field(column) = self.column_for(layout)? else {
            return Err(StoreError::InvalidComponentId(component));
        };
        column.write(idx, bytes);
        if !self.entities[idx].has_component(component) {
            self.entities[idx].add_component(component);
        }
        Ok(())
    }

    fn buffer(&self, id: EntityId, component: ComponentId) -> Option<BufferView<'_>> {
        let idx = self.slot(id)?;
        if !self.entities[idx].has_component(component) {
            return None;
        }
        match self.columns.get(component as usize)? {
            Some(Column::Buffer { stride, buffers }) => Some(buffers[idx].view(*stride)),
            _ => None,
        }
    }

    fn append_buffer(
        &mut self,
        id: EntityId,
        layout: ComponentLayout,
        values: &[u8],
        unique: bool,
    ) -> StoreResult<usize> {
        Self::check_size(layout, values)?;
        let stride = layout.size;
        Ok(self.buffer_mut(id, layout)?.append(stride, values, unique))
    }

    fn remove_buffer(&mut self, id: EntityId, layout: ComponentLayout, values: &[u8]) -> StoreResult<usize> {
        Self::check_size(layout, values)?;
        let stride = layout.size;
        Ok(self.buffer_mut(id, layout)?.swap_remove(stride, values))
    }

    fn set_buffer(&mut self, id: EntityId, layout: ComponentLayout, values: &[u8]) -> StoreResult<()> {
        if !values.is_empty() {
            Self::check_size(layout, values)?;
        }
        self.buffer_mut(id, layout)?.replace(values);
        Ok(())
    }

    fn set_enabled(&mut self, id: EntityId, component: ComponentId, enabled: bool) -> StoreResult<()> {
        let idx = self.live_slot(id)?;
        let entity = &mut self.entities[idx];
        if !entity.has_component(component) {
            return Err(StoreError::MissingComponent { entity: id, component });
        }
        entity.set_enabled(component, enabled);
        Ok(())
    }

    fn is_enabled(&self, id: EntityId, component: ComponentId) -> Option<bool> {
        let entity = self.get(id)?;
        entity
            .has_component(component)
            .then(|| entity.is_enabled(component))
    }

    fn set_suspended(&mut self, id: EntityId, suspended: bool) -> StoreResult<()> {
        let idx = self.live_slot(id)?;
        self.entities[idx].suspended = suspended;
        Ok(())
    }

    fn is_suspended(&self, id: EntityId) -> Option<bool> {
        self.get(id).map(|entity| entity.suspended)
    }

    fn records_with_enabled(&self, component: ComponentId) -> Vec<EntityId> {
        self.iter_alive()
            .filter(|entity| entity.is_enabled(component))
            .map(|entity| entity.id)
            .collect()
    }
}
