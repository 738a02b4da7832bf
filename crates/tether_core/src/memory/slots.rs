//! # Slot Table
//!
//! Generational arena for objects owned by one thread and referenced from
//! others by plain, copyable keys.

/// Key into a [`SlotTable`].
///
/// Keys are `Copy + Send`, so they can travel through lock-free queues and
/// worker threads. Liveness is a generation comparison on lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    /// Index into the table.
    index: u32,
    /// Generation the slot had when the key was issued.
    generation: u32,
}

impl SlotKey {
    /// Index portion of the key.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation portion of the key.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational slot table.
///
/// Values can be inserted and removed individually; removed slots are
/// recycled with a bumped generation so old keys stop resolving.
///
/// # Thread Safety
///
/// The table itself is NOT thread-safe. Keep it on the owning thread and
/// hand out [`SlotKey`]s instead.
///
/// # Example
///
/// ```rust,ignore
/// let mut table: SlotTable<&str> = SlotTable::with_capacity(16);
///
/// let key = table.insert("wrapper");
/// assert_eq!(table.get(key), Some(&"wrapper"));
///
/// table.remove(key);
/// assert!(table.get(key).is_none());
/// ```
pub struct SlotTable<T> {
    /// The storage array.
    slots: Vec<Slot<T>>,
    /// Free list - indices of available slots.
    free_list: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> SlotTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty table with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Returns the number of occupied slots.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no slot is occupied.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value and returns its key.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots are ever created.
    pub fn insert(&mut self, value: T) -> SlotKey {
        self.insert_with(|_| value)
    }

    /// Stores a value built from its own key.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots are ever created.
    pub fn insert_with(&mut self, build: impl FnOnce(SlotKey) -> T) -> SlotKey {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = u32::try_from(self.slots.len()).expect("slot table index overflow");
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
            index
        };

        let slot = &mut self.slots[index as usize];
        let key = SlotKey {
            index,
            generation: slot.generation,
        };
        slot.value = Some(build(key));
        self.len += 1;
        key
    }

    /// Removes the value behind a key.
    ///
    /// # Returns
    ///
    /// The removed value, or `None` if the key was stale.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Whether the key still resolves.
    #[inline]
    #[must_use]
    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Gets a reference to a live value.
    #[inline]
    #[must_use]
    pub fn get(&self, key: SlotKey) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Gets a mutable reference to a live value.
    #[inline]
    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Iterates over all live values.
    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let value = slot.value.as_ref()?;
            #[allow(clippy::cast_possible_truncation)]
            let key = SlotKey {
                index: index as u32,
                generation: slot.generation,
            };
            Some((key, value))
        })
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
