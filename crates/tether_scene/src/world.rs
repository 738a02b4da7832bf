//! # Scene World
//!
//! The control-thread facade. A `SceneWorld` owns the entity store, every
//! wrapper, the lifecycle queues and both command overlays:
//!
//! ```text
//!   attach ──► None ──► Deserializing ──(context ready)──► Creating ──(pass)──► Created
//!                 │            │                                │                  │
//!                 └────────────┴──────── detach ────────────────┴──────────────────┴──► Destroyed
//! ```
//!
//! Lifecycle calls only touch wrappers, queues and overlays. Records are
//! allocated, flushed and destroyed by [`SceneWorld::reconcile`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tether_core::{
    ActiveCount, ArchetypeDescriptor, BufferElement, Component, ComponentLayout, EntityId,
    EntityParent, EntityStore, InstanceCount, RecordStore, SlotTable, PLACEHOLDER_BIT,
};
use tracing::{debug, error, info, trace};

use crate::callbacks::{CallbackChannel, Materialized, OnCreated};
use crate::config::SceneConfig;
use crate::context::{ContextId, ContextReadiness, DescriptorSource};
use crate::counters;
use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::{Command, Overlays, Target};
use crate::queues::{DisposalRecord, LifecycleQueues};
use crate::reconcile::SceneStats;
use crate::remap::ParentRemap;
use crate::status::LifecycleState;
use crate::wrapper::{PersistedIdentity, SceneObjectEntity, TemplateKey, WrapperToken};

/// How a wrapper is attached.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttachOptions {
    /// Owning context.
    pub context: ContextId,
    /// Parent wrapper, if any.
    pub parent: Option<WrapperToken>,
    /// Wrappers attached with the same key share one record.
    pub template: Option<TemplateKey>,
    /// Identity restored from persisted state.
    pub persisted: Option<PersistedIdentity>,
    /// Scene-side enabled intent. Defaults to `true` through [`AttachOptions::new`].
    pub enabled: bool,
}

impl AttachOptions {
    /// Enabled wrapper in `context`, no parent, no template.
    #[must_use]
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the parent wrapper.
    #[must_use]
    pub fn with_parent(mut self, parent: WrapperToken) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the shared-record key.
    #[must_use]
    pub fn with_template(mut self, template: TemplateKey) -> Self {
        self.template = Some(template);
        self
    }

    /// Restores the wrapper from a persisted identity.
    #[must_use]
    pub fn with_persisted(mut self, identity: PersistedIdentity) -> Self {
        self.persisted = Some(identity);
        self
    }

    /// Attaches the wrapper disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The record currently shared under a template key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SharedRecord {
    /// Placeholder the shared record was first requested under.
    pub(crate) target: EntityId,
    pub(crate) descriptor_hash: u64,
}

/// Result of trying to move a wrapper towards `Creating`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BuildOutcome {
    /// `Creating` or `Created`.
    Ready,
    /// Context or parent not ready yet.
    Deferred,
    /// `Invalid` or `Destroyed`; never materializes.
    Invalid,
}

/// Lifecycle bridge between scene-object wrappers and an [`EntityStore`].
///
/// # Example
///
/// ```rust,ignore
/// let mut world = SceneWorld::with_record_store(SceneConfig::default(), descriptors, contexts)?;
/// let token = world.attach(AttachOptions::new(ContextId(0)))?;
/// world.set(token, Health { value: 100 })?;
/// world.reconcile()?;
/// assert_eq!(world.status(token), LifecycleState::Created);
/// ```
pub struct SceneWorld<S, D, R> {
    pub(crate) config: SceneConfig,
    pub(crate) store: S,
    pub(crate) descriptors: D,
    pub(crate) readiness: R,
    pub(crate) wrappers: SlotTable<SceneObjectEntity>,
    pub(crate) queues: Arc<LifecycleQueues>,
    pub(crate) overlays: Overlays,
    pub(crate) templates: HashMap<TemplateKey, SharedRecord>,
    /// Wrappers that joined an existing record; announced at the next pass.
    pub(crate) adoptions: Vec<Materialized>,
    pub(crate) callbacks: CallbackChannel,
    pub(crate) remap: ParentRemap,
    /// Records with a broken counter. Skipped by every job.
    pub(crate) halted: HashSet<EntityId>,
    /// Detached wrappers kept readable as `Destroyed` until the next pass.
    pub(crate) retired: Vec<WrapperToken>,
    next_placeholder: u32,
    pub(crate) stats: SceneStats,
}

impl<D, R> SceneWorld<RecordStore, D, R>
where
    D: DescriptorSource,
    R: ContextReadiness,
{
    /// Creates a world backed by a [`RecordStore`] of `config.store_capacity`.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidConfig`] if the configuration does not validate.
    pub fn with_record_store(config: SceneConfig, descriptors: D, readiness: R) -> LifecycleResult<Self> {
        config.validate()?;
        let store = RecordStore::new(config.store_capacity);
        Self::new(config, store, descriptors, readiness)
    }
}

impl<S, D, R> SceneWorld<S, D, R>
where
    S: EntityStore,
    D: DescriptorSource,
    R: ContextReadiness,
{
    /// Creates a world over an existing store.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidConfig`] if the configuration does not validate.
    pub fn new(config: SceneConfig, store: S, descriptors: D, readiness: R) -> LifecycleResult<Self> {
        config.validate()?;
        info!(
            "Scene world ready: {} workers, {} pooled disposal nodes",
            config.worker_threads, config.free_pool_prewarm
        );
        Ok(Self {
            queues: Arc::new(LifecycleQueues::new(config.free_pool_prewarm)),
            config,
            store,
            descriptors,
            readiness,
            wrappers: SlotTable::new(),
            overlays: Overlays::default(),
            templates: HashMap::new(),
            adoptions: Vec::new(),
            callbacks: CallbackChannel::new(),
            remap: ParentRemap::new(),
            halted: HashSet::new(),
            retired: Vec::new(),
            next_placeholder: 0,
            stats: SceneStats::default(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// The entity store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the entity store, for systems running between passes.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// The descriptor collaborator.
    #[must_use]
    pub const fn descriptors(&self) -> &D {
        &self.descriptors
    }

    /// Mutable access to the descriptor collaborator.
    pub fn descriptors_mut(&mut self) -> &mut D {
        &mut self.descriptors
    }

    /// The readiness collaborator.
    #[must_use]
    pub const fn readiness(&self) -> &R {
        &self.readiness
    }

    /// Mutable access to the readiness collaborator.
    pub fn readiness_mut(&mut self) -> &mut R {
        &mut self.readiness
    }

    /// Shared queues; clone the `Arc` to push from other threads.
    #[must_use]
    pub fn queues(&self) -> Arc<LifecycleQueues> {
        Arc::clone(&self.queues)
    }

    /// Running totals across passes.
    #[must_use]
    pub const fn stats(&self) -> &SceneStats {
        &self.stats
    }

    /// The wrapper behind a token.
    #[must_use]
    pub fn wrapper(&self, token: WrapperToken) -> Option<&SceneObjectEntity> {
        self.wrappers.get(token)
    }

    /// Number of wrappers, including detached ones not yet released.
    #[must_use]
    pub fn wrapper_count(&self) -> usize {
        self.wrappers.len()
    }

    /// Lifecycle state of a wrapper. Released tokens report `Destroyed`.
    #[must_use]
    pub fn status(&self, token: WrapperToken) -> LifecycleState {
        self.wrappers
            .get(token)
            .map_or(LifecycleState::Destroyed, SceneObjectEntity::status)
    }

    /// Record handle of a `Created` wrapper.
    #[must_use]
    pub fn handle(&self, token: WrapperToken) -> Option<EntityId> {
        self.wrappers.get(token).and_then(SceneObjectEntity::handle)
    }

    /// Whether a record was halted after a counter underflow.
    #[must_use]
    pub fn is_halted(&self, handle: EntityId) -> bool {
        self.halted.contains(&handle)
    }

    /// Records with queued instance-overlay writes.
    #[must_use]
    pub fn pending_playback(&self) -> usize {
        self.overlays.instance_len()
    }

    /// Records still waiting to be allocated.
    #[must_use]
    pub fn pending_records(&self) -> usize {
        self.overlays.pending_len()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Attaches a new wrapper.
    ///
    /// With a persisted identity the wrapper is queued for the deserialize
    /// drain. Otherwise it enters `Creating` right away if its context (and
    /// its parent) is ready, and is queued for the drain if not.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::StaleWrapper`] if `options.parent` no longer resolves.
    pub fn attach(&mut self, options: AttachOptions) -> LifecycleResult<WrapperToken> {
        if let Some(parent) = options.parent {
            if !self.wrappers.contains(parent) {
                return Err(LifecycleError::StaleWrapper);
            }
        }

        let token = self.wrappers.insert(SceneObjectEntity::new(
            options.context,
            options.parent,
            options.template,
            options.enabled,
        ));

        if let Some(identity) = options.persisted {
            self.deserialize(token, identity)?;
            return Ok(token);
        }

        if self.try_build(token)? == BuildOutcome::Deferred {
            if let Some(wrapper) = self.wrappers.get_mut(token) {
                wrapper.enter_deserializing();
            }
            self.queues.push_deserialize(token);
            debug!("Wrapper {:?} deferred: context {:?} not ready", token, options.context);
        }
        Ok(token)
    }

    /// Restores a persisted identity and queues the wrapper for the drain.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidLifecycleState`] unless the wrapper is `None`
    /// or `Deserializing`.
    pub fn deserialize(&mut self, token: WrapperToken, identity: PersistedIdentity) -> LifecycleResult<()> {
        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        match wrapper.status {
            LifecycleState::None => {
                wrapper.restore(identity);
                wrapper.enter_deserializing();
                self.queues.push_deserialize(token);
                Ok(())
            }
            // Already queued; the drain binds whatever identity is latest.
            LifecycleState::Deserializing => {
                wrapper.restore(identity);
                Ok(())
            }
            status => Err(LifecycleError::InvalidLifecycleState {
                status,
                operation: "deserialize",
            }),
        }
    }

    /// Detaches a wrapper.
    ///
    /// A wrapper that requested a record pushes one disposal; its counters are
    /// released by the next pass. The wrapper stays readable as `Destroyed`
    /// until then.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidLifecycleState`] if already detached.
    pub fn detach(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        let status = wrapper.status;
        let disposal = match status {
            LifecycleState::Destroyed => {
                return Err(LifecycleError::InvalidLifecycleState {
                    status,
                    operation: "detach",
                })
            }
            LifecycleState::Invalid => {
                self.wrappers.remove(token);
                return Ok(());
            }
            LifecycleState::Creating => Some(DisposalRecord {
                status,
                target: wrapper.placeholder,
                was_active: wrapper.is_active,
            }),
            LifecycleState::Created => Some(DisposalRecord {
                status,
                target: wrapper.handle,
                was_active: wrapper.is_active,
            }),
            LifecycleState::None | LifecycleState::Deserializing => None,
        };

        let placeholder = wrapper.placeholder;
        wrapper.destroy();
        if status == LifecycleState::Creating {
            self.overlays.remove_waiter(placeholder, token);
        }
        if let Some(record) = disposal {
            self.queues.push_disposal(record);
        }
        self.retired.push(token);
        trace!("Wrapper {:?} detached from {}", token, status);
        Ok(())
    }

    /// Marks the wrapper enabled and counts it as an active owner.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidLifecycleState`] after detach;
    /// [`LifecycleError::CounterUnderflow`] if the record's count is broken.
    pub fn enable(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        self.set_intent(token, true, "enable")
    }

    /// Marks the wrapper disabled and releases its active ownership.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::enable`].
    pub fn disable(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        self.set_intent(token, false, "disable")
    }

    fn set_intent(&mut self, token: WrapperToken, enabled: bool, operation: &'static str) -> LifecycleResult<()> {
        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        if wrapper.status.is_terminal() {
            return Err(LifecycleError::InvalidLifecycleState {
                status: wrapper.status,
                operation,
            });
        }
        wrapper.enabled = enabled;
        if !wrapper.status.accepts_commands() || wrapper.is_active == enabled {
            return Ok(());
        }

        let target = self.target_of(token, operation)?;
        let delta = if enabled { 1 } else { -1 };
        if let Err(error) = counters::add::<ActiveCount, S>(&mut self.overlays, &self.store, target, delta) {
            self.halt(target, &error);
            return Err(error);
        }
        if let Some(wrapper) = self.wrappers.get_mut(token) {
            wrapper.is_active = enabled;
        }
        Ok(())
    }

    /// Discards the wrapper's record and requests a new one.
    ///
    /// In `None`/`Deserializing` only the descriptor is recomputed.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::RebuildWhileCreating`] while a record is pending
    /// - [`LifecycleError::InvalidLifecycleState`] after detach or invalidation
    pub fn rebuild(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        match wrapper.status {
            LifecycleState::Creating => Err(LifecycleError::RebuildWhileCreating),
            status @ (LifecycleState::Destroyed | LifecycleState::Invalid) => {
                Err(LifecycleError::InvalidLifecycleState {
                    status,
                    operation: "rebuild",
                })
            }
            LifecycleState::None | LifecycleState::Deserializing => self.prepare(token),
            LifecycleState::Created => {
                let target = Target::Record {
                    handle: wrapper.handle,
                    placeholder: wrapper.placeholder,
                };
                let (was_active, handle) = (wrapper.is_active, wrapper.handle);
                self.release(target, was_active)?;
                if let Some(wrapper) = self.wrappers.get_mut(token) {
                    wrapper.is_active = false;
                }
                // The template key must not hand the old record straight back.
                let overlays = &self.overlays;
                self.templates
                    .retain(|_, shared| overlays.resolve(shared.target) != Some(handle));
                debug!("Wrapper {:?} rebuilding away from {:?}", token, target.entity());
                self.begin_creating(token)
            }
        }
    }

    /// Recomputes the descriptor; a `Created` wrapper whose descriptor
    /// changed is rebuilt.
    ///
    /// # Returns
    ///
    /// `true` if the descriptor changed.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::rebuild`]. A `Creating` wrapper that alone waits on
    /// its pending record gets that record's descriptor swapped; otherwise the
    /// change is applied by a rebuild after the wrapper reaches `Created`.
    pub fn refresh_descriptor(&mut self, token: WrapperToken) -> LifecycleResult<bool> {
        let descriptor = self.descriptor_for(token)?;
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        let changed = wrapper.descriptor_hash != descriptor.content_hash(wrapper.identity_hash)
            || wrapper.descriptor.is_none();
        if !changed {
            return Ok(false);
        }
        let (status, placeholder, template) = (wrapper.status, wrapper.placeholder, wrapper.template);
        match status {
            LifecycleState::Created => self.rebuild(token)?,
            LifecycleState::Creating => {
                if !self.overlays.redescribe(placeholder, token, descriptor) {
                    // Shared or already allocated: the stale hash triggers a rebuild once Created.
                    debug!("Wrapper {:?} keeps its pending descriptor until Created", token);
                    return Ok(true);
                }
                self.prepare(token)?;
                let hash = self.wrappers.get(token).map_or(0, |wrapper| wrapper.descriptor_hash);
                if let Some(shared) = template
                    .and_then(|key| self.templates.get_mut(&key))
                    .filter(|shared| shared.target == placeholder)
                {
                    shared.descriptor_hash = hash;
                }
            }
            LifecycleState::None | LifecycleState::Deserializing => self.prepare(token)?,
            LifecycleState::Destroyed | LifecycleState::Invalid => {
                return Err(LifecycleError::InvalidLifecycleState {
                    status,
                    operation: "refresh_descriptor",
                })
            }
        }
        Ok(true)
    }

    /// Registers a callback run with the record handle once it exists.
    ///
    /// A `Created` wrapper runs it immediately. The callback is kept and runs
    /// again after every rebuild.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidLifecycleState`] after detach or invalidation.
    pub fn register_on_created(
        &mut self,
        token: WrapperToken,
        callback: impl FnMut(EntityId) + 'static,
    ) -> LifecycleResult<()> {
        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        if wrapper.status.is_terminal() {
            return Err(LifecycleError::InvalidLifecycleState {
                status: wrapper.status,
                operation: "register_on_created",
            });
        }
        let mut callback: OnCreated = Box::new(callback);
        if wrapper.status == LifecycleState::Created {
            callback(wrapper.handle);
        }
        wrapper.on_created.push(callback);
        Ok(())
    }

    // =========================================================================
    // Internals shared with the reconciliation pass
    // =========================================================================

    /// Where operations on a wrapper land.
    pub(crate) fn target_of(&self, token: WrapperToken, operation: &'static str) -> LifecycleResult<Target> {
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        match wrapper.status {
            LifecycleState::Creating => Ok(match self.overlays.resolve(wrapper.placeholder) {
                Some(handle) => Target::Record {
                    handle,
                    placeholder: wrapper.placeholder,
                },
                None => Target::Pending(wrapper.placeholder),
            }),
            LifecycleState::Created => Ok(Target::Record {
                handle: wrapper.handle,
                placeholder: wrapper.placeholder,
            }),
            status => Err(LifecycleError::InvalidLifecycleState { status, operation }),
        }
    }

    /// Moves a `None`/`Deserializing` wrapper to `Creating` if it can.
    pub(crate) fn try_build(&mut self, token: WrapperToken) -> LifecycleResult<BuildOutcome> {
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        match wrapper.status {
            LifecycleState::Creating | LifecycleState::Created => return Ok(BuildOutcome::Ready),
            LifecycleState::Destroyed | LifecycleState::Invalid => return Ok(BuildOutcome::Invalid),
            LifecycleState::None | LifecycleState::Deserializing => {}
        }
        let (context, is_instance, parent) = (wrapper.context, wrapper.is_instance, wrapper.parent);

        if !is_instance {
            if !self.readiness.is_context_valid(context) {
                self.invalidate(token);
                return Ok(BuildOutcome::Invalid);
            }
            if !self.readiness.is_context_fully_loaded(context) {
                self.prepare(token)?;
                return Ok(BuildOutcome::Deferred);
            }
        }

        if let Some(parent) = parent {
            let parent_outcome = match self.try_build(parent) {
                Err(LifecycleError::StaleWrapper) => BuildOutcome::Invalid,
                other => other?,
            };
            if parent_outcome == BuildOutcome::Deferred {
                self.prepare(token)?;
                return Ok(BuildOutcome::Deferred);
            }
        }

        self.begin_creating(token)?;
        Ok(BuildOutcome::Ready)
    }

    fn invalidate(&mut self, token: WrapperToken) {
        if let Some(wrapper) = self.wrappers.get_mut(token) {
            wrapper.invalidate();
            self.stats.wrappers_invalidated += 1;
            info!(
                "Wrapper {:?} invalidated: context {:?} can never load",
                token, wrapper.context
            );
        }
    }

    /// Descriptor from the collaborator plus the bookkeeping components.
    fn descriptor_for(&self, token: WrapperToken) -> LifecycleResult<ArchetypeDescriptor> {
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        let mut bookkeeping = vec![
            ComponentLayout::field::<InstanceCount>(),
            ComponentLayout::field::<ActiveCount>(),
        ];
        if wrapper.parent.is_some() {
            bookkeeping.push(ComponentLayout::buffer::<EntityParent>());
        }
        Ok(self
            .descriptors
            .compute_descriptor(wrapper.context)
            .extended(bookkeeping))
    }

    /// Binds any restored identity and refreshes the cached descriptor.
    fn prepare(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        let descriptor = self.descriptor_for(token)?;
        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        wrapper.bind_identity();
        if wrapper.refresh_descriptor(descriptor) {
            debug!(
                "Wrapper {:?} descriptor rebuilt (hash {:#018x})",
                token, wrapper.descriptor_hash
            );
        }
        Ok(())
    }

    fn allocate_placeholder(&mut self) -> EntityId {
        let serial = self.next_placeholder;
        self.next_placeholder = serial.wrapping_add(1) & (PLACEHOLDER_BIT - 1);
        EntityId::placeholder(serial)
    }

    /// Parent reference for a child link: handle, or placeholder while pending.
    fn parent_link(&self, parent: WrapperToken) -> Option<EntityId> {
        let wrapper = self.wrappers.get(parent)?;
        match wrapper.status {
            LifecycleState::Created => Some(wrapper.handle),
            LifecycleState::Creating => Some(
                self.overlays
                    .resolve(wrapper.placeholder)
                    .unwrap_or(wrapper.placeholder),
            ),
            _ => None,
        }
    }

    /// Requests a record for the wrapper and enters `Creating`.
    fn begin_creating(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        self.prepare(token)?;
        let wrapper = self.wrappers.get(token).ok_or(LifecycleError::StaleWrapper)?;
        let descriptor = wrapper.descriptor.clone().unwrap_or_default();
        let hash = wrapper.descriptor_hash;
        let (template, parent, enabled) = (wrapper.template, wrapper.parent, wrapper.enabled);
        let link = parent.and_then(|parent| self.parent_link(parent));
        if parent.is_some() && link.is_none() {
            debug!("Wrapper {:?} builds without a parent link: parent is gone", token);
        }

        let (target, placeholder) = match template {
            Some(key) => self.shared_target(key, hash, descriptor, token),
            None => {
                let placeholder = self.allocate_placeholder();
                self.overlays.open(placeholder, descriptor);
                self.overlays.add_waiter(placeholder, token);
                (Target::Pending(placeholder), placeholder)
            }
        };

        counters::add::<InstanceCount, S>(&mut self.overlays, &self.store, target, 1)?;
        // A zero delta still marks the count dirty so a new record gets suspended.
        counters::add::<ActiveCount, S>(&mut self.overlays, &self.store, target, i32::from(enabled))?;
        if let Some(entity) = link {
            let queue = self
                .overlays
                .queue_mut(target)
                .ok_or(LifecycleError::StaleWrapper)?;
            queue.push(Command::AppendBuffer {
                layout: ComponentLayout::buffer::<EntityParent>(),
                bytes: bytemuck::bytes_of(&EntityParent { entity }).to_vec(),
                unique: true,
            });
            queue.toggle(EntityParent::ID, true);
        }

        let wrapper = self.wrappers.get_mut(token).ok_or(LifecycleError::StaleWrapper)?;
        wrapper.is_active = enabled;
        wrapper.enter_creating(placeholder);
        trace!("Wrapper {:?} creating as {:?}", token, target);
        Ok(())
    }

    /// Joins, adopts or opens the record shared under a template key.
    fn shared_target(
        &mut self,
        key: TemplateKey,
        hash: u64,
        descriptor: ArchetypeDescriptor,
        token: WrapperToken,
    ) -> (Target, EntityId) {
        if let Some(shared) = self
            .templates
            .get(&key)
            .copied()
            .filter(|shared| shared.descriptor_hash == hash)
        {
            if self.overlays.add_waiter(shared.target, token) {
                return (Target::Pending(shared.target), shared.target);
            }
            let handle = self
                .overlays
                .resolve(shared.target)
                .filter(|handle| self.store.is_alive(*handle) && !self.halted.contains(handle));
            if let Some(handle) = handle {
                let placeholder = self.allocate_placeholder();
                self.overlays.bind(placeholder, handle);
                self.adoptions.push(Materialized {
                    token,
                    handle,
                    placeholder,
                });
                return (Target::Record { handle, placeholder }, placeholder);
            }
        }

        let placeholder = self.allocate_placeholder();
        self.overlays.open(placeholder, descriptor);
        self.overlays.add_waiter(placeholder, token);
        self.templates.insert(
            key,
            SharedRecord {
                target: placeholder,
                descriptor_hash: hash,
            },
        );
        (Target::Pending(placeholder), placeholder)
    }

    /// Releases one instance (and optionally one active) owner of a target.
    pub(crate) fn release(&mut self, target: Target, was_active: bool) -> LifecycleResult<i32> {
        if was_active {
            if let Err(error) = counters::add::<ActiveCount, S>(&mut self.overlays, &self.store, target, -1) {
                self.halt(target, &error);
                return Err(error);
            }
        }
        counters::add::<InstanceCount, S>(&mut self.overlays, &self.store, target, -1).map_err(|error| {
            self.halt(target, &error);
            error
        })
    }

    /// Stops all processing of a record with a broken counter.
    pub(crate) fn halt(&mut self, target: Target, error: &LifecycleError) {
        self.stats.underflows += 1;
        if let Target::Record { handle, .. } = target {
            self.halted.insert(handle);
        }
        error!("Halting {:?}: {}", target.entity(), error);
    }

    /// Typed helper for [`Command::SetField`] payloads.
    pub(crate) fn field_bytes<C: Component>(value: &C) -> Vec<u8> {
        bytemuck::bytes_of(value).to_vec()
    }

    /// Typed helper for buffer payloads.
    pub(crate) fn buffer_bytes<B: BufferElement>(values: &[B]) -> Vec<u8> {
        bytemuck::cast_slice(values).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextState, ContextTable, DescriptorTable};
    use std::cell::RefCell;
    use std::rc::Rc;

    type World = SceneWorld<RecordStore, DescriptorTable, ContextTable>;

    const READY: ContextId = ContextId(1);
    const LOADING: ContextId = ContextId(2);

    fn world() -> World {
        let mut contexts = ContextTable::new();
        contexts.set(READY, ContextState::Loaded);
        let config = SceneConfig {
            store_capacity: 64,
            ..SceneConfig::default()
        };
        SceneWorld::with_record_store(config, DescriptorTable::default(), contexts).unwrap()
    }

    #[test]
    fn test_attach_ready_context_enters_creating() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        assert_eq!(world.status(token), LifecycleState::Creating);
        assert_eq!(world.handle(token), None);
        assert_eq!(world.pending_records(), 1);
    }

    #[test]
    fn test_attach_loading_context_defers() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(LOADING)).unwrap();
        assert_eq!(world.status(token), LifecycleState::Deserializing);
        assert_eq!(world.pending_records(), 0);
        assert!(!world.queues().is_idle());
    }

    #[test]
    fn test_attach_with_stale_parent_fails() {
        let mut world = world();
        let parent = world.attach(AttachOptions::new(LOADING)).unwrap();
        world.detach(parent).unwrap();
        world.retired.clear();
        world.wrappers.remove(parent);

        assert_eq!(
            world.attach(AttachOptions::new(READY).with_parent(parent)),
            Err(LifecycleError::StaleWrapper)
        );
    }

    #[test]
    fn test_deserialize_only_before_creating() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        assert_eq!(
            world.deserialize(token, PersistedIdentity(vec![1])),
            Err(LifecycleError::InvalidLifecycleState {
                status: LifecycleState::Creating,
                operation: "deserialize",
            })
        );
    }

    #[test]
    fn test_persisted_identity_marks_instance() {
        let mut world = world();
        let token = world
            .attach(AttachOptions::new(LOADING).with_persisted(PersistedIdentity(b"id".to_vec())))
            .unwrap();
        let wrapper = world.wrapper(token).unwrap();
        assert!(wrapper.is_instance());
        assert_eq!(wrapper.status(), LifecycleState::Deserializing);
    }

    #[test]
    fn test_detach_twice_is_rejected() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        world.detach(token).unwrap();
        assert_eq!(world.status(token), LifecycleState::Destroyed);
        assert!(matches!(
            world.detach(token),
            Err(LifecycleError::InvalidLifecycleState { .. })
        ));
    }

    #[test]
    fn test_rebuild_while_creating() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        assert_eq!(world.rebuild(token), Err(LifecycleError::RebuildWhileCreating));
    }

    #[test]
    fn test_rebuild_deserializing_only_refreshes_descriptor() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(LOADING)).unwrap();
        world.rebuild(token).unwrap();
        assert_eq!(world.status(token), LifecycleState::Deserializing);
        assert!(world.wrapper(token).unwrap().descriptor().is_some());
    }

    #[test]
    fn test_enable_disable_counts_once() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        let target = world.target_of(token, "test").unwrap();
        let active = |world: &World| {
            world
                .overlays
                .read_field(&world.store, target, ActiveCount::ID)
                .map(|bytes| bytemuck::pod_read_unaligned::<ActiveCount>(&bytes).value)
        };

        assert_eq!(active(&world), Some(1));
        world.enable(token).unwrap();
        assert_eq!(active(&world), Some(1));
        world.disable(token).unwrap();
        world.disable(token).unwrap();
        assert_eq!(active(&world), Some(0));
        assert!(!world.wrapper(token).unwrap().is_active());
    }

    #[test]
    fn test_callback_registered_while_creating_waits() {
        let mut world = world();
        let token = world.attach(AttachOptions::new(READY)).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        world
            .register_on_created(token, move |handle| sink.borrow_mut().push(handle))
            .unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_placeholders_are_unique_and_flagged() {
        let mut world = world();
        let a = world.allocate_placeholder();
        let b = world.allocate_placeholder();
        assert_ne!(a, b);
        assert!(a.is_placeholder() && b.is_placeholder());
    }
}
