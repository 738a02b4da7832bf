//! # Command Overlays
//!
//! Two tiers of queued writes sit in front of the entity store:
//!
//! ```text
//!   read priority:   instance overlay  >  pending set  >  record
//!                    (by real handle)     (by placeholder)
//! ```
//!
//! - A [`PendingCommandSet`] collects everything issued against a record
//!   that does not exist yet. It is flushed exactly once when the record is
//!   allocated, then discarded.
//! - The instance overlay queues writes against a real handle and plays them
//!   back at the next reconciliation pass.
//!
//! Reads replay the queued commands on top of the stored value, so callers
//! always observe their own writes.
//!
//! Within a queue, data commands keep FIFO order and enable toggles are
//! applied after all of them.

use std::collections::{BTreeMap, HashMap};

use tether_core::{
    ArchetypeDescriptor, ComponentId, ComponentKind, ComponentLayout, EntityId, EntityStore,
    RawBuffer, StoreError,
};

use crate::wrapper::WrapperToken;

/// A queued, type-erased write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Overwrite a field value, adding the field if needed.
    SetField {
        /// Field id.
        component: ComponentId,
        /// New value bytes.
        bytes: Vec<u8>,
    },
    /// Add a zeroed field or an empty buffer.
    AddField(ComponentLayout),
    /// Remove a field or buffer.
    RemoveField(ComponentId),
    /// Append elements to a buffer.
    AppendBuffer {
        /// Buffer layout.
        layout: ComponentLayout,
        /// Element bytes.
        bytes: Vec<u8>,
        /// Skip elements that are already present.
        unique: bool,
    },
    /// Swap-remove the first occurrence of each element.
    RemoveBuffer {
        /// Buffer layout.
        layout: ComponentLayout,
        /// Element bytes.
        bytes: Vec<u8>,
    },
    /// Replace the buffer contents.
    SetBuffer {
        /// Buffer layout.
        layout: ComponentLayout,
        /// Element bytes.
        bytes: Vec<u8>,
    },
}

impl Command {
    /// Component the command touches.
    #[must_use]
    pub const fn component(&self) -> ComponentId {
        match self {
            Self::SetField { component, .. } | Self::RemoveField(component) => *component,
            Self::AddField(layout)
            | Self::AppendBuffer { layout, .. }
            | Self::RemoveBuffer { layout, .. }
            | Self::SetBuffer { layout, .. } => layout.id,
        }
    }

    fn apply<S: EntityStore + ?Sized>(&self, store: &mut S, handle: EntityId) -> Result<(), StoreError> {
        match self {
            Self::SetField { component, bytes } => store.set_field(handle, *component, bytes),
            Self::AddField(layout) => store.add_field(handle, *layout),
            Self::RemoveField(component) => store.remove_field(handle, *component).map(drop),
            Self::AppendBuffer { layout, bytes, unique } => {
                store.append_buffer(handle, *layout, bytes, *unique).map(drop)
            }
            Self::RemoveBuffer { layout, bytes } => store.remove_buffer(handle, *layout, bytes).map(drop),
            Self::SetBuffer { layout, bytes } => store.set_buffer(handle, *layout, bytes),
        }
    }
}

/// FIFO of data commands plus enable toggles applied last.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandQueue {
    commands: Vec<Command>,
    toggles: Vec<(ComponentId, bool)>,
}

impl CommandQueue {
    /// Queues a data command.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Queues an enable toggle.
    pub fn toggle(&mut self, component: ComponentId, enabled: bool) {
        self.toggles.push((component, enabled));
    }

    /// Number of queued commands and toggles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len() + self.toggles.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.toggles.is_empty()
    }

    /// Applies every command in order, then every toggle.
    ///
    /// A failing command does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub fn apply<S: EntityStore + ?Sized>(&self, store: &mut S, handle: EntityId) -> Result<(), StoreError> {
        let mut first_error = None;
        for command in &self.commands {
            if let Err(error) = command.apply(store, handle) {
                first_error.get_or_insert(error);
            }
        }
        for &(component, enabled) in &self.toggles {
            if let Err(error) = store.set_enabled(handle, component, enabled) {
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Replays queued writes of one field over `base`.
    #[must_use]
    pub fn replay_field(&self, component: ComponentId, base: Option<Vec<u8>>) -> Option<Vec<u8>> {
        let mut value = base;
        for command in self.commands.iter().filter(|c| c.component() == component) {
            match command {
                Command::SetField { bytes, .. } => value = Some(bytes.clone()),
                Command::AddField(layout) if layout.kind == ComponentKind::Field => {
                    if value.is_none() {
                        value = Some(vec![0; layout.size]);
                    }
                }
                Command::RemoveField(_) => value = None,
                _ => {}
            }
        }
        value
    }

    /// Replays queued writes of one buffer over `base`.
    #[must_use]
    pub fn replay_buffer(&self, layout: ComponentLayout, base: Option<Vec<u8>>) -> Option<Vec<u8>> {
        let stride = layout.size;
        let mut value = base;
        for command in self.commands.iter().filter(|c| c.component() == layout.id) {
            match command {
                Command::AppendBuffer { bytes, unique, .. } => {
                    let mut buffer = RawBuffer::from_bytes(value.take().unwrap_or_default());
                    buffer.append(stride, bytes, *unique);
                    value = Some(buffer.into_bytes());
                }
                Command::RemoveBuffer { bytes, .. } => {
                    let mut buffer = RawBuffer::from_bytes(value.take().unwrap_or_default());
                    buffer.swap_remove(stride, bytes);
                    value = Some(buffer.into_bytes());
                }
                Command::SetBuffer { bytes, .. } => value = Some(bytes.clone()),
                Command::AddField(added) if added.kind == ComponentKind::Buffer => {
                    if value.is_none() {
                        value = Some(Vec::new());
                    }
                }
                Command::RemoveField(_) => value = None,
                _ => {}
            }
        }
        value
    }

    /// Replays presence of a component over `base`.
    #[must_use]
    pub fn replay_presence(&self, component: ComponentId, base: bool) -> bool {
        self.commands
            .iter()
            .filter(|c| c.component() == component)
            .fold(base, |_, command| !matches!(command, Command::RemoveField(_)))
    }

    /// Last queued toggle of a component.
    #[must_use]
    pub fn last_toggle(&self, component: ComponentId) -> Option<bool> {
        self.toggles
            .iter()
            .rev()
            .find(|(id, _)| *id == component)
            .map(|&(_, enabled)| enabled)
    }
}

/// Writes queued against a record that is still pending.
#[derive(Clone, Debug)]
pub struct PendingCommandSet {
    pub(crate) descriptor: ArchetypeDescriptor,
    pub(crate) queue: CommandQueue,
    pub(crate) waiters: Vec<WrapperToken>,
}

impl PendingCommandSet {
    pub(crate) fn new(descriptor: ArchetypeDescriptor) -> Self {
        Self {
            descriptor,
            queue: CommandQueue::default(),
            waiters: Vec::new(),
        }
    }

    /// Descriptor the record will be allocated with.
    #[must_use]
    pub const fn descriptor(&self) -> &ArchetypeDescriptor {
        &self.descriptor
    }

    /// Queued writes.
    #[must_use]
    pub const fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Wrappers waiting for this record.
    #[must_use]
    pub fn waiters(&self) -> &[WrapperToken] {
        &self.waiters
    }

    fn default_field(&self, component: ComponentId) -> Option<Vec<u8>> {
        self.descriptor
            .layout(component)
            .filter(|layout| layout.kind == ComponentKind::Field)
            .map(|layout| vec![0; layout.size])
    }

    fn default_buffer(&self, component: ComponentId) -> Option<Vec<u8>> {
        self.descriptor
            .layout(component)
            .filter(|layout| layout.kind == ComponentKind::Buffer)
            .map(|_| Vec::new())
    }
}

/// Where an operation on a wrapper lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Record not allocated yet; keyed by placeholder.
    Pending(EntityId),
    /// Record exists.
    Record {
        /// Real handle.
        handle: EntityId,
        /// Placeholder the record was requested under, or `NULL`.
        placeholder: EntityId,
    },
}

impl Target {
    /// Placeholder or handle, for error reporting.
    #[must_use]
    pub const fn entity(self) -> EntityId {
        match self {
            Self::Pending(placeholder) => placeholder,
            Self::Record { handle, .. } => handle,
        }
    }
}

/// Both overlay tiers plus the placeholder -> handle lookup table.
#[derive(Debug, Default)]
pub struct Overlays {
    /// Ordered by placeholder serial, so materialization follows request order.
    pending: BTreeMap<EntityId, PendingCommandSet>,
    instance: HashMap<EntityId, CommandQueue>,
    resolved: HashMap<EntityId, EntityId>,
    placeholders: HashMap<EntityId, Vec<EntityId>>,
}

impl Overlays {
    // =========================================================================
    // Pending sets
    // =========================================================================

    /// Opens a pending set for a new placeholder.
    pub fn open(&mut self, placeholder: EntityId, descriptor: ArchetypeDescriptor) {
        self.pending.insert(placeholder, PendingCommandSet::new(descriptor));
    }

    /// Registers a wrapper waiting for a pending record.
    ///
    /// # Returns
    ///
    /// `false` if no pending set exists for the placeholder.
    pub fn add_waiter(&mut self, placeholder: EntityId, token: WrapperToken) -> bool {
        match self.pending.get_mut(&placeholder) {
            Some(set) => {
                set.waiters.push(token);
                true
            }
            None => false,
        }
    }

    /// Removes a waiter from a pending set.
    pub fn remove_waiter(&mut self, placeholder: EntityId, token: WrapperToken) {
        if let Some(set) = self.pending.get_mut(&placeholder) {
            set.waiters.retain(|waiter| *waiter != token);
        }
    }

    /// The pending set of a placeholder.
    #[must_use]
    pub fn pending(&self, placeholder: EntityId) -> Option<&PendingCommandSet> {
        self.pending.get(&placeholder)
    }

    /// Placeholders with a pending set, in request order.
    #[must_use]
    pub fn pending_placeholders(&self) -> Vec<EntityId> {
        self.pending.keys().copied().collect()
    }

    /// Number of pending sets.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Removes a pending set for flushing or discarding.
    pub fn take_pending(&mut self, placeholder: EntityId) -> Option<PendingCommandSet> {
        self.pending.remove(&placeholder)
    }

    /// Swaps the descriptor of a pending set `token` waits on alone.
    ///
    /// # Returns
    ///
    /// `false` if the set is shared, already flushed or unknown.
    pub fn redescribe(&mut self, placeholder: EntityId, token: WrapperToken, descriptor: ArchetypeDescriptor) -> bool {
        match self.pending.get_mut(&placeholder) {
            Some(set) if set.waiters == [token] => {
                set.descriptor = descriptor;
                true
            }
            _ => false,
        }
    }

    /// Puts back a pending set whose record could not be allocated.
    pub fn put_back(&mut self, placeholder: EntityId, set: PendingCommandSet) {
        self.pending.insert(placeholder, set);
    }

    // =========================================================================
    // Lookup table
    // =========================================================================

    /// Records that `placeholder` now names `handle`.
    pub fn bind(&mut self, placeholder: EntityId, handle: EntityId) {
        self.resolved.insert(placeholder, handle);
        self.placeholders.entry(handle).or_default().push(placeholder);
    }

    /// Real handle of a placeholder, once materialized.
    #[must_use]
    pub fn resolve(&self, placeholder: EntityId) -> Option<EntityId> {
        self.resolved.get(&placeholder).copied()
    }

    /// Read-only lookup table for the remap pass.
    #[must_use]
    pub const fn resolved(&self) -> &HashMap<EntityId, EntityId> {
        &self.resolved
    }

    /// Drops every trace of a destroyed record.
    pub fn forget_record(&mut self, handle: EntityId) {
        self.instance.remove(&handle);
        for placeholder in self.placeholders.remove(&handle).unwrap_or_default() {
            self.resolved.remove(&placeholder);
        }
    }

    // =========================================================================
    // Instance overlay
    // =========================================================================

    /// Removes every instance queue, ordered by handle.
    pub fn take_instance_queues(&mut self) -> Vec<(EntityId, CommandQueue)> {
        let mut queues: Vec<_> = self.instance.drain().collect();
        queues.sort_unstable_by_key(|(handle, _)| *handle);
        queues
    }

    /// Number of records with queued instance writes.
    #[must_use]
    pub fn instance_len(&self) -> usize {
        self.instance.len()
    }

    // =========================================================================
    // Routing
    // =========================================================================

    /// Queue that writes against `target` go to.
    ///
    /// # Returns
    ///
    /// `None` if the target is a placeholder without a pending set.
    pub fn queue_mut(&mut self, target: Target) -> Option<&mut CommandQueue> {
        match target {
            Target::Pending(placeholder) => self.pending.get_mut(&placeholder).map(|set| &mut set.queue),
            Target::Record { handle, .. } => Some(self.instance.entry(handle).or_default()),
        }
    }

    /// Merged field read.
    #[must_use]
    pub fn read_field<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        target: Target,
        component: ComponentId,
    ) -> Option<Vec<u8>> {
        match target {
            Target::Pending(placeholder) => {
                let set = self.pending.get(&placeholder)?;
                set.queue.replay_field(component, set.default_field(component))
            }
            Target::Record { handle, placeholder } => {
                let mut value = store.get_field(handle, component).map(<[u8]>::to_vec);
                if let Some(set) = self.pending.get(&placeholder) {
                    value = set.queue.replay_field(component, value);
                }
                match self.instance.get(&handle) {
                    Some(queue) => queue.replay_field(component, value),
                    None => value,
                }
            }
        }
    }

    /// Merged buffer read.
    #[must_use]
    pub fn read_buffer<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        target: Target,
        layout: ComponentLayout,
    ) -> Option<Vec<u8>> {
        match target {
            Target::Pending(placeholder) => {
                let set = self.pending.get(&placeholder)?;
                set.queue.replay_buffer(layout, set.default_buffer(layout.id))
            }
            Target::Record { handle, placeholder } => {
                let mut value = store
                    .buffer(handle, layout.id)
                    .map(|view| view.as_bytes().to_vec());
                if let Some(set) = self.pending.get(&placeholder) {
                    value = set.queue.replay_buffer(layout, value);
                }
                match self.instance.get(&handle) {
                    Some(queue) => queue.replay_buffer(layout, value),
                    None => value,
                }
            }
        }
    }

    /// Merged presence check.
    #[must_use]
    pub fn has_component<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        target: Target,
        component: ComponentId,
    ) -> bool {
        match target {
            Target::Pending(placeholder) => self.pending.get(&placeholder).is_some_and(|set| {
                set.queue
                    .replay_presence(component, set.descriptor.contains(component))
            }),
            Target::Record { handle, placeholder } => {
                let mut present = store.has_field(handle, component);
                if let Some(set) = self.pending.get(&placeholder) {
                    present = set.queue.replay_presence(component, present);
                }
                match self.instance.get(&handle) {
                    Some(queue) => queue.replay_presence(component, present),
                    None => present,
                }
            }
        }
    }

    /// Merged enabled flag, `None` when the component is absent.
    #[must_use]
    pub fn is_enabled<S: EntityStore + ?Sized>(
        &self,
        store: &S,
        target: Target,
        component: ComponentId,
    ) -> Option<bool> {
        if !self.has_component(store, target, component) {
            return None;
        }
        let (instance, pending, stored) = match target {
            Target::Pending(placeholder) => (None, self.pending.get(&placeholder), None),
            Target::Record { handle, placeholder } => (
                self.instance.get(&handle),
                self.pending.get(&placeholder),
                store.is_enabled(handle, component),
            ),
        };
        let toggled = instance
            .and_then(|queue| queue.last_toggle(component))
            .or_else(|| pending.and_then(|set| set.queue.last_toggle(component)));
        Some(toggled.or(stored).unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{
        ActiveCount, BufferElement, Component, EntityParent, InstanceCount, RecordStore, SlotTable,
    };

    fn parent_bytes(ids: &[u32]) -> Vec<u8> {
        let parents: Vec<EntityParent> = ids
            .iter()
            .map(|&i| EntityParent { entity: EntityId::new(i, 1) })
            .collect();
        bytemuck::cast_slice(&parents).to_vec()
    }

    fn descriptor() -> ArchetypeDescriptor {
        ArchetypeDescriptor::new([
            ComponentLayout::field::<InstanceCount>(),
            ComponentLayout::buffer::<EntityParent>(),
        ])
    }

    #[test]
    fn test_toggles_applied_after_data() {
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&ArchetypeDescriptor::empty()).unwrap();

        let mut queue = CommandQueue::default();
        queue.toggle(ActiveCount::ID, false);
        queue.push(Command::SetField {
            component: ActiveCount::ID,
            bytes: bytemuck::bytes_of(&ActiveCount { value: 2 }).to_vec(),
        });
        queue.apply(&mut store, handle).unwrap();

        assert_eq!(store.component::<ActiveCount>(handle), Some(ActiveCount { value: 2 }));
        assert_eq!(store.is_enabled(handle, ActiveCount::ID), Some(false));
    }

    #[test]
    fn test_apply_continues_after_failure() {
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&ArchetypeDescriptor::empty()).unwrap();

        let mut queue = CommandQueue::default();
        queue.toggle(InstanceCount::ID, true);
        queue.push(Command::SetField {
            component: ActiveCount::ID,
            bytes: bytemuck::bytes_of(&ActiveCount { value: 1 }).to_vec(),
        });

        assert!(queue.apply(&mut store, handle).is_err());
        assert_eq!(store.component::<ActiveCount>(handle), Some(ActiveCount { value: 1 }));
    }

    #[test]
    fn test_buffer_replay_matches_store() {
        let layout = ComponentLayout::buffer::<EntityParent>();
        let mut queue = CommandQueue::default();
        queue.push(Command::AppendBuffer { layout, bytes: parent_bytes(&[1, 2, 3]), unique: false });
        queue.push(Command::AppendBuffer { layout, bytes: parent_bytes(&[2, 4]), unique: true });
        queue.push(Command::RemoveBuffer { layout, bytes: parent_bytes(&[1]) });

        let replayed = queue.replay_buffer(layout, None).unwrap();

        let mut store = RecordStore::new(1);
        let handle = store.allocate_record(&ArchetypeDescriptor::empty()).unwrap();
        queue.apply(&mut store, handle).unwrap();
        assert_eq!(store.buffer(handle, EntityParent::ID).unwrap().as_bytes(), &replayed[..]);
    }

    #[test]
    fn test_pending_reads_see_own_writes() {
        let mut overlays = Overlays::default();
        let store = RecordStore::new(1);
        let placeholder = EntityId::placeholder(0);
        overlays.open(placeholder, descriptor());
        let target = Target::Pending(placeholder);

        assert_eq!(
            overlays.read_field(&store, target, InstanceCount::ID),
            Some(vec![0; 4])
        );
        overlays.queue_mut(target).unwrap().push(Command::SetField {
            component: InstanceCount::ID,
            bytes: bytemuck::bytes_of(&InstanceCount { value: 5 }).to_vec(),
        });
        assert_eq!(
            overlays.read_field(&store, target, InstanceCount::ID),
            Some(bytemuck::bytes_of(&InstanceCount { value: 5 }).to_vec())
        );
        assert_eq!(overlays.read_field(&store, target, ActiveCount::ID), None);
        assert!(overlays.has_component(&store, target, EntityParent::ID));
        assert_eq!(overlays.is_enabled(&store, target, InstanceCount::ID), Some(true));
    }

    #[test]
    fn test_instance_overrides_pending_overrides_record() {
        let mut overlays = Overlays::default();
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&descriptor()).unwrap();
        let placeholder = EntityId::placeholder(7);
        store
            .set_field(handle, InstanceCount::ID, bytemuck::bytes_of(&InstanceCount { value: 1 }))
            .unwrap();
        let target = Target::Record { handle, placeholder };
        let read = |overlays: &Overlays, store: &RecordStore| {
            overlays
                .read_field(store, target, InstanceCount::ID)
                .map(|bytes| bytemuck::pod_read_unaligned::<InstanceCount>(&bytes).value)
        };

        assert_eq!(read(&overlays, &store), Some(1));

        overlays.open(placeholder, descriptor());
        overlays.queue_mut(Target::Pending(placeholder)).unwrap().push(Command::SetField {
            component: InstanceCount::ID,
            bytes: bytemuck::bytes_of(&InstanceCount { value: 2 }).to_vec(),
        });
        assert_eq!(read(&overlays, &store), Some(2));

        overlays.queue_mut(target).unwrap().push(Command::SetField {
            component: InstanceCount::ID,
            bytes: bytemuck::bytes_of(&InstanceCount { value: 3 }).to_vec(),
        });
        assert_eq!(read(&overlays, &store), Some(3));

        overlays.queue_mut(target).unwrap().toggle(InstanceCount::ID, false);
        assert_eq!(overlays.is_enabled(&store, target, InstanceCount::ID), Some(false));
    }

    #[test]
    fn test_remove_field_hides_value() {
        let mut overlays = Overlays::default();
        let placeholder = EntityId::placeholder(1);
        let store = RecordStore::new(1);
        overlays.open(placeholder, descriptor());
        let target = Target::Pending(placeholder);

        overlays
            .queue_mut(target)
            .unwrap()
            .push(Command::RemoveField(InstanceCount::ID));
        assert_eq!(overlays.read_field(&store, target, InstanceCount::ID), None);
        assert!(!overlays.has_component(&store, target, InstanceCount::ID));
        assert_eq!(overlays.is_enabled(&store, target, InstanceCount::ID), None);
    }

    #[test]
    fn test_bind_and_forget() {
        let mut overlays = Overlays::default();
        let mut tokens = SlotTable::new();
        let token = tokens.insert(());
        let placeholder = EntityId::placeholder(3);
        let handle = EntityId::new(0, 1);

        overlays.open(placeholder, descriptor());
        assert!(overlays.add_waiter(placeholder, token));
        assert!(!overlays.add_waiter(EntityId::placeholder(4), token));
        overlays.remove_waiter(placeholder, token);
        assert!(overlays.pending(placeholder).unwrap().waiters().is_empty());

        overlays.bind(placeholder, handle);
        assert_eq!(overlays.resolve(placeholder), Some(handle));
        overlays
            .queue_mut(Target::Record { handle, placeholder })
            .unwrap()
            .push(Command::RemoveField(InstanceCount::ID));
        assert_eq!(overlays.instance_len(), 1);

        overlays.forget_record(handle);
        assert_eq!(overlays.resolve(placeholder), None);
        assert_eq!(overlays.instance_len(), 0);
    }

    #[test]
    fn test_redescribe_only_sole_waiter() {
        let mut overlays = Overlays::default();
        let mut tokens = SlotTable::new();
        let (a, b) = (tokens.insert(()), tokens.insert(()));
        let placeholder = EntityId::placeholder(1);
        let wider = descriptor().extended([ComponentLayout::field::<ActiveCount>()]);

        overlays.open(placeholder, descriptor());
        overlays.add_waiter(placeholder, a);
        assert!(overlays.redescribe(placeholder, a, wider.clone()));
        assert!(overlays.pending(placeholder).unwrap().descriptor().contains(ActiveCount::ID));

        overlays.add_waiter(placeholder, b);
        assert!(!overlays.redescribe(placeholder, a, descriptor()));
        assert!(!overlays.redescribe(EntityId::placeholder(2), a, descriptor()));
        assert_eq!(overlays.pending(placeholder).unwrap().descriptor(), &wider);
    }
}
