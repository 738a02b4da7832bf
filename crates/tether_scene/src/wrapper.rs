//! # Scene-Object Wrappers
//!
//! A wrapper is the control-thread side of one scene object's entity
//! lifecycle. It is stored in a [`SlotTable`](tether_core::SlotTable) and
//! referenced everywhere else by a [`WrapperToken`].

use tether_core::{content_hash_of, ArchetypeDescriptor, EntityId, SlotKey};

use crate::callbacks::OnCreated;
use crate::context::ContextId;
use crate::status::LifecycleState;

/// Generation-checked reference to a wrapper.
///
/// Tokens are `Copy + Send` and can be carried through lock-free queues and
/// worker threads; a token whose wrapper was detached simply stops resolving.
pub type WrapperToken = SlotKey;

/// Key under which wrappers share one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey(pub u64);

/// Opaque identity blob restored from persisted state.
///
/// A non-empty blob means a record identity was already bound before this
/// lifecycle began.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistedIdentity(pub Vec<u8>);

impl PersistedIdentity {
    /// Whether the blob binds an identity.
    #[inline]
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.0.is_empty()
    }

    /// Stable hash mixed into the descriptor cache key.
    #[must_use]
    pub fn content_hash(&self) -> u64 {
        content_hash_of(&self.0)
    }
}

/// Control-thread wrapper of one scene object.
///
/// # Invariant
///
/// `handle` is non-null exactly when `status` is [`LifecycleState::Created`].
pub struct SceneObjectEntity {
    pub(crate) status: LifecycleState,
    pub(crate) handle: EntityId,
    /// Provisional identity. Kept after materialization so merged reads can
    /// consult a pending set that has not been flushed yet.
    pub(crate) placeholder: EntityId,
    pub(crate) is_instance: bool,
    pub(crate) persisted: Option<PersistedIdentity>,
    pub(crate) identity_hash: Option<u64>,
    pub(crate) parent: Option<WrapperToken>,
    /// Whether this wrapper is currently counted in the record's active count.
    pub(crate) is_active: bool,
    /// Scene-side intent to be active.
    pub(crate) enabled: bool,
    pub(crate) context: ContextId,
    pub(crate) template: Option<TemplateKey>,
    pub(crate) descriptor: Option<ArchetypeDescriptor>,
    pub(crate) descriptor_hash: u64,
    pub(crate) on_created: Vec<OnCreated>,
}

impl SceneObjectEntity {
    pub(crate) fn new(
        context: ContextId,
        parent: Option<WrapperToken>,
        template: Option<TemplateKey>,
        enabled: bool,
    ) -> Self {
        Self {
            status: LifecycleState::None,
            handle: EntityId::NULL,
            placeholder: EntityId::NULL,
            is_instance: false,
            persisted: None,
            identity_hash: None,
            parent,
            is_active: false,
            enabled,
            context,
            template,
            descriptor: None,
            descriptor_hash: 0,
            on_created: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn status(&self) -> LifecycleState {
        self.status
    }

    /// The materialized record, if any.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> Option<EntityId> {
        (!self.handle.is_null()).then_some(self.handle)
    }

    /// Provisional identity of the most recent record request.
    #[inline]
    #[must_use]
    pub fn placeholder(&self) -> Option<EntityId> {
        (!self.placeholder.is_null()).then_some(self.placeholder)
    }

    /// Whether a record identity was bound before this lifecycle began.
    #[inline]
    #[must_use]
    pub const fn is_instance(&self) -> bool {
        self.is_instance
    }

    /// Whether the wrapper is counted as an active owner of its record.
    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Scene-side enabled intent.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Owning context.
    #[inline]
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Parent wrapper, lookup only.
    #[inline]
    #[must_use]
    pub const fn parent(&self) -> Option<WrapperToken> {
        self.parent
    }

    /// Shared-record key.
    #[inline]
    #[must_use]
    pub const fn template(&self) -> Option<TemplateKey> {
        self.template
    }

    /// Cached descriptor, once computed.
    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> Option<&ArchetypeDescriptor> {
        self.descriptor.as_ref()
    }

    /// Stores a persisted identity to be bound by the deserialize drain.
    pub(crate) fn restore(&mut self, identity: PersistedIdentity) {
        self.is_instance = identity.is_bound();
        self.persisted = Some(identity);
    }

    /// Binds a restored identity into the descriptor cache key.
    ///
    /// # Returns
    ///
    /// `true` if an identity was pending.
    pub(crate) fn bind_identity(&mut self) -> bool {
        let Some(identity) = self.persisted.take() else {
            return false;
        };
        self.identity_hash = identity.is_bound().then(|| identity.content_hash());
        true
    }

    /// Replaces the cached descriptor when its content hash changed.
    ///
    /// # Returns
    ///
    /// `true` if the cache was replaced.
    pub(crate) fn refresh_descriptor(&mut self, computed: ArchetypeDescriptor) -> bool {
        let hash = computed.content_hash(self.identity_hash);
        if self.descriptor.is_some() && hash == self.descriptor_hash {
            return false;
        }
        self.descriptor = Some(computed);
        self.descriptor_hash = hash;
        true
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn transition(&mut self, next: LifecycleState) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal lifecycle edge {} -> {}",
            self.status,
            next
        );
        self.status = next;
        debug_assert_eq!(
            self.handle.is_null(),
            self.status != LifecycleState::Created,
            "handle must be set exactly while Created"
        );
    }

    pub(crate) fn enter_deserializing(&mut self) {
        self.transition(LifecycleState::Deserializing);
    }

    pub(crate) fn enter_creating(&mut self, placeholder: EntityId) {
        self.handle = EntityId::NULL;
        self.placeholder = placeholder;
        self.transition(LifecycleState::Creating);
    }

    pub(crate) fn enter_created(&mut self, handle: EntityId) {
        self.handle = handle;
        self.transition(LifecycleState::Created);
    }

    pub(crate) fn invalidate(&mut self) {
        self.transition(LifecycleState::Invalid);
    }

    pub(crate) fn destroy(&mut self) {
        self.handle = EntityId::NULL;
        self.is_active = false;
        self.transition(LifecycleState::Destroyed);
    }
}
