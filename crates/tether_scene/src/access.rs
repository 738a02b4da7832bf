//! # Typed Data Access
//!
//! Field and buffer operations by wrapper token. Writes are queued in the
//! overlay tier the wrapper's status selects; reads merge the record with
//! every queued write, so a caller always sees its own writes.

use tether_core::{
    BufferElement, BufferView, Component, ComponentId, ComponentLayout, EntityStore, StoreError, MAX_COMPONENTS,
};

use crate::context::{ContextReadiness, DescriptorSource};
use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::Command;
use crate::wrapper::WrapperToken;
use crate::SceneWorld;

/// Rejects ids the record masks cannot hold, before anything is queued.
fn check_component(component: ComponentId) -> LifecycleResult<()> {
    if usize::from(component) < MAX_COMPONENTS {
        Ok(())
    } else {
        Err(StoreError::InvalidComponentId(component).into())
    }
}

impl<S, D, R> SceneWorld<S, D, R>
where
    S: EntityStore,
    D: DescriptorSource,
    R: ContextReadiness,
{
    fn queue_command(&mut self, token: WrapperToken, operation: &'static str, command: Command) -> LifecycleResult<()> {
        check_component(command.component())?;
        let target = self.target_of(token, operation)?;
        self.overlays
            .queue_mut(target)
            .ok_or(LifecycleError::StaleWrapper)?
            .push(command);
        Ok(())
    }

    fn queue_toggle(
        &mut self,
        token: WrapperToken,
        component: ComponentId,
        enabled: bool,
    ) -> LifecycleResult<()> {
        check_component(component)?;
        let target = self.target_of(token, "set_enabled")?;
        self.overlays
            .queue_mut(target)
            .ok_or(LifecycleError::StaleWrapper)?
            .toggle(component, enabled);
        Ok(())
    }

    fn read_buffer_bytes<B: BufferElement>(
        &self,
        token: WrapperToken,
        operation: &'static str,
    ) -> LifecycleResult<Option<Vec<u8>>> {
        check_component(B::ID)?;
        let target = self.target_of(token, operation)?;
        Ok(self
            .overlays
            .read_buffer(&self.store, target, ComponentLayout::buffer::<B>()))
    }

    // =========================================================================
    // Fields
    // =========================================================================

    /// Writes a field, adding it if the record lacks it.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::InvalidLifecycleState`] unless `Creating` or `Created`
    /// - [`LifecycleError::Store`] with [`StoreError::InvalidComponentId`] if
    ///   the id does not fit the record masks
    pub fn set<C: Component>(&mut self, token: WrapperToken, value: C) -> LifecycleResult<()> {
        self.queue_command(
            token,
            "set",
            Command::SetField {
                component: C::ID,
                bytes: Self::field_bytes(&value),
            },
        )
    }

    /// Reads a field.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::MissingRecordField`] if the field was never added,
    /// plus the errors of [`SceneWorld::set`].
    pub fn get<C: Component>(&self, token: WrapperToken) -> LifecycleResult<C> {
        self.try_get::<C>(token)?
            .ok_or(LifecycleError::MissingRecordField { component: C::ID })
    }

    /// Reads a field, `None` if absent.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn try_get<C: Component>(&self, token: WrapperToken) -> LifecycleResult<Option<C>> {
        check_component(C::ID)?;
        let target = self.target_of(token, "get")?;
        Ok(self
            .overlays
            .read_field(&self.store, target, C::ID)
            .filter(|bytes| bytes.len() == std::mem::size_of::<C>())
            .map(|bytes| bytemuck::pod_read_unaligned(&bytes)))
    }

    /// Adds a zeroed field.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn add_component<C: Component>(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        self.queue_command(token, "add_component", Command::AddField(ComponentLayout::field::<C>()))
    }

    /// Removes a field.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn remove_component<C: Component>(&mut self, token: WrapperToken) -> LifecycleResult<()> {
        self.queue_command(token, "remove_component", Command::RemoveField(C::ID))
    }

    /// Whether the record has (or will have) the field.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::try_get`].
    pub fn has_component<C: Component>(&self, token: WrapperToken) -> LifecycleResult<bool> {
        check_component(C::ID)?;
        let target = self.target_of(token, "has_component")?;
        Ok(self.overlays.has_component(&self.store, target, C::ID))
    }

    /// Queues an enable toggle; applied after every data write.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn set_enabled<C: Component>(&mut self, token: WrapperToken, enabled: bool) -> LifecycleResult<()> {
        self.queue_toggle(token, C::ID, enabled)
    }

    /// Enabled flag of a field, `None` if absent.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::try_get`].
    pub fn is_enabled<C: Component>(&self, token: WrapperToken) -> LifecycleResult<Option<bool>> {
        check_component(C::ID)?;
        let target = self.target_of(token, "is_enabled")?;
        Ok(self.overlays.is_enabled(&self.store, target, C::ID))
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Appends elements, creating the buffer if needed.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn append_buffer<B: BufferElement>(&mut self, token: WrapperToken, values: &[B]) -> LifecycleResult<()> {
        self.queue_command(
            token,
            "append_buffer",
            Command::AppendBuffer {
                layout: ComponentLayout::buffer::<B>(),
                bytes: Self::buffer_bytes(values),
                unique: false,
            },
        )
    }

    /// Appends elements not already present.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn append_buffer_unique<B: BufferElement>(
        &mut self,
        token: WrapperToken,
        values: &[B],
    ) -> LifecycleResult<()> {
        self.queue_command(
            token,
            "append_buffer_unique",
            Command::AppendBuffer {
                layout: ComponentLayout::buffer::<B>(),
                bytes: Self::buffer_bytes(values),
                unique: true,
            },
        )
    }

    /// Swap-removes the first occurrence of each element.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn remove_buffer<B: BufferElement>(&mut self, token: WrapperToken, values: &[B]) -> LifecycleResult<()> {
        self.queue_command(
            token,
            "remove_buffer",
            Command::RemoveBuffer {
                layout: ComponentLayout::buffer::<B>(),
                bytes: Self::buffer_bytes(values),
            },
        )
    }

    /// Replaces the buffer contents.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn set_buffer<B: BufferElement>(&mut self, token: WrapperToken, values: &[B]) -> LifecycleResult<()> {
        self.queue_command(
            token,
            "set_buffer",
            Command::SetBuffer {
                layout: ComponentLayout::buffer::<B>(),
                bytes: Self::buffer_bytes(values),
            },
        )
    }

    /// Reads a whole buffer.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::MissingRecordField`] if the buffer was never added,
    /// plus the errors of [`SceneWorld::set`].
    pub fn get_buffer<B: BufferElement>(&self, token: WrapperToken) -> LifecycleResult<Vec<B>> {
        self.try_get_buffer::<B>(token)?
            .ok_or(LifecycleError::MissingRecordField { component: B::ID })
    }

    /// Reads a whole buffer, `None` if absent.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::try_get`].
    pub fn try_get_buffer<B: BufferElement>(&self, token: WrapperToken) -> LifecycleResult<Option<Vec<B>>> {
        Ok(self
            .read_buffer_bytes::<B>(token, "get_buffer")?
            .map(|bytes| BufferView::new(std::mem::size_of::<B>(), &bytes).to_vec()))
    }

    /// Reads one buffer element, `None` if the buffer or index is absent.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::try_get`].
    pub fn try_get_buffer_element<B: BufferElement>(
        &self,
        token: WrapperToken,
        index: usize,
    ) -> LifecycleResult<Option<B>> {
        Ok(self
            .read_buffer_bytes::<B>(token, "get_buffer")?
            .and_then(|bytes| BufferView::new(std::mem::size_of::<B>(), &bytes).get(index)))
    }

    /// Queues an enable toggle for a buffer.
    ///
    /// # Errors
    ///
    /// As [`SceneWorld::set`].
    pub fn set_buffer_enabled<B: BufferElement>(&mut self, token: WrapperToken, enabled: bool) -> LifecycleResult<()> {
        self.queue_toggle(token, B::ID, enabled)
    }
}
