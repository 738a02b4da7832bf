//! # Entity Handles
//!
//! Handles are lightweight identifiers consisting of:
//! - An index into record slots
//! - A generation counter for safe reuse
//!
//! A handle whose index carries [`PLACEHOLDER_BIT`] is a provisional identity:
//! it names a record that has been requested but not yet materialized.

use bytemuck::{Pod, Zeroable};

/// Index bit reserved for provisional (pre-materialization) identities.
pub const PLACEHOLDER_BIT: u32 = 1 << 31;

/// Unique identifier for a record.
///
/// The ID is split into two parts:
/// - Lower 32 bits: Index into record slots (top bit marks a placeholder)
/// - Upper 32 bits: Generation counter for detecting stale references
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates a new entity ID from index and generation.
    ///
    /// # Arguments
    ///
    /// * `index` - The slot index (0 to 2^31-1 for real records)
    /// * `generation` - The generation counter (0 to 2^32-1)
    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (index as u64))
    }

    /// Creates a provisional identity from a serial number.
    ///
    /// Placeholders key pending commands until the record they stand for has
    /// been allocated.
    #[inline]
    #[must_use]
    pub const fn placeholder(serial: u32) -> Self {
        Self::new((serial & !PLACEHOLDER_BIT) | PLACEHOLDER_BIT, 0)
    }

    /// Returns the index portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Returns the generation portion of the entity ID.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Null/invalid entity ID.
    pub const NULL: Self = Self(u64::MAX);

    /// Checks if this entity ID is null/invalid.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u64::MAX
    }

    /// Checks if this is a provisional identity rather than a real record.
    #[inline]
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        !self.is_null() && (self.index() & PLACEHOLDER_BIT) != 0
    }

    /// Checks if this handle names a materialized record slot.
    #[inline]
    #[must_use]
    pub const fn is_record(self) -> bool {
        !self.is_null() && !self.is_placeholder()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Record slot header with its components' presence and enabled flags.
///
/// Bit `n` of each mask refers to component id `n`.
#[derive(Clone, Copy, Debug)]
pub struct Entity {
    /// The unique identifier for this record.
    pub id: EntityId,
    /// Bitmask of attached components and buffers (up to 64 types).
    pub component_mask: u64,
    /// Bitmask of enabled components. Only meaningful where `component_mask` is set.
    pub enabled_mask: u64,
    /// Whether this slot is currently alive.
    pub alive: bool,
    /// Whether the record is suspended (no active owners).
    pub suspended: bool,
}

/// Mask bit of a component id; zero for ids past the mask width.
#[inline]
const fn bit(component_id: u8) -> u64 {
    match 1u64.checked_shl(component_id as u32) {
        Some(bit) => bit,
        None => 0,
    }
}

impl Entity {
    /// Creates a new live record header.
    #[inline]
    #[must_use]
    pub const fn new(id: EntityId) -> Self {
        Self {
            id,
            component_mask: 0,
            enabled_mask: 0,
            alive: true,
            suspended: false,
        }
    }

    /// Creates a dead/empty slot.
    #[inline]
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            id: EntityId::NULL,
            component_mask: 0,
            enabled_mask: 0,
            alive: false,
            suspended: false,
        }
    }

    /// Checks if this record has a specific component.
    ///
    /// # Arguments
    ///
    /// * `component_id` - The component type ID (0-63)
    #[inline]
    #[must_use]
    pub const fn has_component(self, component_id: u8) -> bool {
        (self.component_mask & bit(component_id)) != 0
    }

    /// Checks if a present component is enabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(self, component_id: u8) -> bool {
        self.has_component(component_id) && (self.enabled_mask & bit(component_id)) != 0
    }

    /// Adds a component flag to this record. New components start enabled.
    ///
    /// # Arguments
    ///
    /// * `component_id` - The component type ID (0-63)
    #[inline]
    pub fn add_component(&mut self, component_id: u8) {
        self.component_mask |= bit(component_id);
        self.enabled_mask |= bit(component_id);
    }

    /// Removes a component flag from this record.
    ///
    /// # Arguments
    ///
    /// * `component_id` - The component type ID (0-63)
    #[inline]
    pub fn remove_component(&mut self, component_id: u8) {
        self.component_mask &= !bit(component_id);
        self.enabled_mask &= !bit(component_id);
    }

    /// Sets the enabled flag of a component.
    #[inline]
    pub fn set_enabled(&mut self, component_id: u8, enabled: bool) {
        if enabled {
            self.enabled_mask |= bit(component_id);
        } else {
            self.enabled_mask &= !bit(component_id);
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::dead()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new(12345, 67890);
        assert_eq!(id.index(), 12345);
        assert_eq!(id.generation(), 67890);
        assert!(id.is_record());
    }

    #[test]
    fn test_placeholder_is_distinct_from_records() {
        let placeholder = EntityId::placeholder(7);
        assert!(placeholder.is_placeholder());
        assert!(!placeholder.is_record());
        assert_ne!(placeholder, EntityId::new(7, 0));
        assert!(!EntityId::NULL.is_placeholder());
        assert!(!EntityId::NULL.is_record());
    }

    #[test]
    fn test_entity_enabled_mask() {
        let mut entity = Entity::new(EntityId::new(0, 0));
        assert!(!entity.is_enabled(5));

        entity.add_component(5);
        assert!(entity.is_enabled(5));

        entity.set_enabled(5, false);
        assert!(entity.has_component(5));
        assert!(!entity.is_enabled(5));

        entity.remove_component(5);
        entity.set_enabled(5, true);
        assert!(!entity.is_enabled(5));
    }

    #[test]
    fn test_out_of_range_ids_never_match() {
        let mut entity = Entity::new(EntityId::new(0, 0));
        entity.add_component(70);
        entity.set_enabled(200, true);
        assert_eq!(entity.component_mask, 0);
        assert_eq!(entity.enabled_mask, 0);
        assert!(!entity.has_component(64));
        assert!(!entity.is_enabled(70));
        entity.remove_component(255);
    }
}
