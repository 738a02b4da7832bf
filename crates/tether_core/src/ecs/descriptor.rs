//! # Archetype Descriptors
//!
//! The computed set of component and buffer types a record needs, plus a
//! content hash used to decide whether a cached descriptor is stale.
//!
//! Descriptors are produced by an external scanner; this module only
//! normalizes and hashes them.

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

use super::component::{ComponentId, ComponentKind, ComponentLayout};

/// Fixed SipHash keys so hashes are stable across runs and processes.
const HASH_KEYS: (u64, u64) = (0x7465_7468_6572_0001, 0x6465_7363_7269_0002);

/// Sorted, de-duplicated component set with its content hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchetypeDescriptor {
    /// Layouts sorted by component id, one per id.
    components: Vec<ComponentLayout>,
    /// SipHash of the normalized component set.
    hash: u64,
}

impl ArchetypeDescriptor {
    /// Creates a descriptor from an unordered component list.
    ///
    /// Duplicate ids keep their first occurrence.
    #[must_use]
    pub fn new(components: impl IntoIterator<Item = ComponentLayout>) -> Self {
        let mut seen = 0u64;
        let mut list: Vec<ComponentLayout> = Vec::new();
        for layout in components {
            let bit = 1u64.checked_shl(u32::from(layout.id)).unwrap_or(0);
            if seen & bit != 0 {
                continue;
            }
            seen |= bit;
            list.push(layout);
        }
        list.sort_unstable_by_key(|layout| layout.id);

        let hash = Self::hash_layouts(&list);
        Self {
            components: list,
            hash,
        }
    }

    /// Descriptor with no components.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Returns a copy of this descriptor with additional layouts.
    #[must_use]
    pub fn extended(&self, extra: impl IntoIterator<Item = ComponentLayout>) -> Self {
        Self::new(self.components.iter().copied().chain(extra))
    }

    /// Content hash of the component set.
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Hash of the component set combined with a persisted identity hash.
    #[must_use]
    pub fn content_hash(&self, identity_hash: Option<u64>) -> u64 {
        match identity_hash {
            None => self.hash,
            Some(identity) => {
                let mut hasher = SipHasher13::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
                hasher.write_u64(self.hash);
                hasher.write_u64(identity);
                hasher.finish()
            }
        }
    }

    /// All layouts, sorted by id.
    #[inline]
    #[must_use]
    pub fn layouts(&self) -> &[ComponentLayout] {
        &self.components
    }

    /// Looks up the layout registered for a component id.
    #[must_use]
    pub fn layout(&self, id: ComponentId) -> Option<ComponentLayout> {
        self.components
            .binary_search_by_key(&id, |layout| layout.id)
            .ok()
            .map(|index| self.components[index])
    }

    /// Checks whether a component id is part of the descriptor.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.layout(id).is_some()
    }

    /// Number of component types.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the descriptor has no component types.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    fn hash_layouts(layouts: &[ComponentLayout]) -> u64 {
        let mut hasher = SipHasher13::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
        for layout in layouts {
            hasher.write_u8(layout.id);
            hasher.write_u8(match layout.kind {
                ComponentKind::Field => 0,
                ComponentKind::Buffer => 1,
            });
            hasher.write_usize(layout.size);
        }
        hasher.finish()
    }
}

impl Default for ArchetypeDescriptor {
    fn default() -> Self {
        Self::empty()
    }
}

/// Stable SipHash of an opaque byte blob (persisted identities).
#[must_use]
pub fn content_hash_of(bytes: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(HASH_KEYS.0, HASH_KEYS.1);
    hasher.write(bytes);
    hasher.finish()
}
