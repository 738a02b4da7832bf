//! # Context Collaborators
//!
//! Wrappers belong to an owning context (a scene, a loading group). Two
//! narrow traits describe what the lifecycle layer needs to know about it:
//! whether it is ready, and which components its wrappers carry.

use std::collections::HashMap;

use tether_core::ArchetypeDescriptor;

/// Identifier of the context a wrapper lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

/// Produces the component set for wrappers of a context.
///
/// The returned descriptor carries its own content hash; the lifecycle layer
/// only compares hashes to decide whether to rebuild.
pub trait DescriptorSource {
    /// Computes the descriptor for a wrapper of `context`.
    fn compute_descriptor(&self, context: ContextId) -> ArchetypeDescriptor;
}

/// Reports whether a context is ready for record creation.
pub trait ContextReadiness {
    /// Whether the context has finished loading.
    fn is_context_fully_loaded(&self, context: ContextId) -> bool;

    /// Whether the context can still become ready. `false` is conclusive.
    fn is_context_valid(&self, context: ContextId) -> bool {
        let _ = context;
        true
    }
}

/// Loading state of a context in a [`ContextTable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContextState {
    /// Still loading.
    #[default]
    Loading,
    /// Fully loaded.
    Loaded,
    /// Unloaded or orphaned; never becomes ready.
    Invalid,
}

/// Map-backed [`ContextReadiness`]. Unknown contexts are treated as loading.
#[derive(Clone, Debug, Default)]
pub struct ContextTable {
    states: HashMap<ContextId, ContextState>,
}

impl ContextTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the state of a context.
    pub fn set(&mut self, context: ContextId, state: ContextState) {
        self.states.insert(context, state);
    }

    /// Current state of a context.
    #[must_use]
    pub fn state(&self, context: ContextId) -> ContextState {
        self.states.get(&context).copied().unwrap_or_default()
    }
}

impl ContextReadiness for ContextTable {
    fn is_context_fully_loaded(&self, context: ContextId) -> bool {
        self.state(context) == ContextState::Loaded
    }

    fn is_context_valid(&self, context: ContextId) -> bool {
        self.state(context) != ContextState::Invalid
    }
}

/// Map-backed [`DescriptorSource`] with a fallback for unknown contexts.
#[derive(Clone, Debug, Default)]
pub struct DescriptorTable {
    descriptors: HashMap<ContextId, ArchetypeDescriptor>,
    fallback: ArchetypeDescriptor,
}

impl DescriptorTable {
    /// Creates a table whose unknown contexts map to `fallback`.
    #[must_use]
    pub fn new(fallback: ArchetypeDescriptor) -> Self {
        Self {
            descriptors: HashMap::new(),
            fallback,
        }
    }

    /// Registers the descriptor of a context, replacing any previous one.
    pub fn set(&mut self, context: ContextId, descriptor: ArchetypeDescriptor) {
        self.descriptors.insert(context, descriptor);
    }
}

impl DescriptorSource for DescriptorTable {
    fn compute_descriptor(&self, context: ContextId) -> ArchetypeDescriptor {
        self.descriptors
            .get(&context)
            .unwrap_or(&self.fallback)
            .clone()
    }
}
