//! # Component System
//!
//! Components are pure data containers with no behavior. They must be `Pod`
//! so that they can cross the store boundary as plain bytes and be queued in
//! command overlays without knowing their concrete type.

use bytemuck::{Pod, Zeroable};

use super::entity::EntityId;

/// Identifier of a component or buffer type (0-63).
pub type ComponentId = u8;

/// Width of the per-record component bitmask.
pub const MAX_COMPONENTS: usize = 64;

/// Marker trait for single-value record fields.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, PartialEq, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     value: u32,
/// }
///
/// impl Component for Health {
///     const ID: ComponentId = 3;
/// }
/// ```
pub trait Component: Copy + Pod + Zeroable + Default + PartialEq + Send + Sync + 'static {
    /// Unique identifier for this component type (0-63).
    const ID: ComponentId;
}

/// Marker trait for elements of per-record dynamic buffers.
///
/// Buffer element ids share the component id space.
pub trait BufferElement: Copy + Pod + Zeroable + PartialEq + Send + Sync + 'static {
    /// Unique identifier for this buffer type (0-63).
    const ID: ComponentId;
}

/// Storage kind of a component type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    /// One value per record.
    Field,
    /// A variable-length list of values per record.
    Buffer,
}

/// Type-erased description of a component column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentLayout {
    /// Component identifier.
    pub id: ComponentId,
    /// Field or buffer.
    pub kind: ComponentKind,
    /// Size of one value (or buffer element) in bytes.
    pub size: usize,
}

impl ComponentLayout {
    /// Layout of a single-value component.
    #[inline]
    #[must_use]
    pub const fn field<C: Component>() -> Self {
        Self {
            id: C::ID,
            kind: ComponentKind::Field,
            size: std::mem::size_of::<C>(),
        }
    }

    /// Layout of a buffer component.
    #[inline]
    #[must_use]
    pub const fn buffer<B: BufferElement>() -> Self {
        Self {
            id: B::ID,
            kind: ComponentKind::Buffer,
            size: std::mem::size_of::<B>(),
        }
    }
}

// =============================================================================
// Bookkeeping components owned by the lifecycle layer
// =============================================================================

/// Number of wrapper objects currently pointing at a record.
///
/// While the component is enabled the record is queued for the per-pass
/// instance scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InstanceCount {
    /// Live owner count. Never negative.
    pub value: i32,
}

impl Component for InstanceCount {
    const ID: ComponentId = 61;
}

/// Number of wrapper objects that currently consider themselves enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ActiveCount {
    /// Active owner count. Never negative.
    pub value: i32,
}

impl Component for ActiveCount {
    const ID: ComponentId = 62;
}

/// Parent link element. May hold a placeholder until the parent materializes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct EntityParent {
    /// The parent's handle or provisional identity.
    pub entity: EntityId,
}

impl BufferElement for EntityParent {
    const ID: ComponentId = 63;
}
