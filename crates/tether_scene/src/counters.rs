//! # Shared-Record Reference Counters
//!
//! Every record carries an [`InstanceCount`] (wrappers pointing at it) and an
//! [`ActiveCount`] (wrappers that consider themselves enabled). Changes go
//! through the command overlays; the component's enabled bit marks the
//! counter dirty so the per-pass jobs revisit only touched records.

use std::collections::HashSet;

use tether_core::{ActiveCount, Component, EntityId, EntityStore, InstanceCount};
use tracing::warn;

use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::{Command, Overlays, Target};

/// A non-negative owner counter stored as a record field.
pub trait Counter: Component {
    /// Name used in errors and logs.
    const NAME: &'static str;

    /// Current count.
    fn count(self) -> i32;

    /// Builds the component from a count.
    fn from_count(count: i32) -> Self;
}

impl Counter for InstanceCount {
    const NAME: &'static str = "InstanceCount";

    fn count(self) -> i32 {
        self.value
    }

    fn from_count(count: i32) -> Self {
        Self { value: count }
    }
}

impl Counter for ActiveCount {
    const NAME: &'static str = "ActiveCount";

    fn count(self) -> i32 {
        self.value
    }

    fn from_count(count: i32) -> Self {
        Self { value: count }
    }
}

fn decode<C: Counter>(bytes: &[u8]) -> i32 {
    if bytes.len() == std::mem::size_of::<C>() {
        bytemuck::pod_read_unaligned::<C>(bytes).count()
    } else {
        0
    }
}

/// Adds `delta` to a counter through the overlays and marks it dirty.
///
/// # Errors
///
/// [`LifecycleError::CounterUnderflow`] if the result would be negative;
/// nothing is queued in that case.
pub fn add<C: Counter, S: EntityStore + ?Sized>(
    overlays: &mut Overlays,
    store: &S,
    target: Target,
    delta: i32,
) -> LifecycleResult<i32> {
    let current = overlays
        .read_field(store, target, C::ID)
        .map_or(0, |bytes| decode::<C>(&bytes));
    let next = current + delta;
    if next < 0 {
        return Err(LifecycleError::CounterUnderflow {
            counter: C::NAME,
            entity: target.entity(),
        });
    }

    let queue = overlays.queue_mut(target).ok_or(LifecycleError::StaleWrapper)?;
    queue.push(Command::SetField {
        component: C::ID,
        bytes: bytemuck::bytes_of(&C::from_count(next)).to_vec(),
    });
    queue.toggle(C::ID, true);
    Ok(next)
}

/// Reads a counter straight from the store.
#[must_use]
pub fn stored<C: Counter, S: EntityStore + ?Sized>(store: &S, handle: EntityId) -> Option<i32> {
    store.get_field(handle, C::ID).map(decode::<C>)
}

/// Result of the per-pass counter jobs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CounterOutcome {
    /// Records destroyed because no wrapper points at them any more.
    pub destroyed: Vec<EntityId>,
    /// Records that lost their last active owner.
    pub suspended: usize,
    /// Records that regained an active owner.
    pub resumed: usize,
    /// Records found with a negative counter; they are halted by the caller.
    pub underflows: Vec<LifecycleError>,
}

fn clear_dirty<C: Counter, S: EntityStore + ?Sized>(store: &mut S, handle: EntityId) {
    if let Err(error) = store.set_enabled(handle, C::ID, false) {
        warn!("{} of {:?} stays dirty: {}", C::NAME, handle, error);
    }
}

/// Job 1: destroy every dirty record whose instance count reached zero.
pub fn run_instance_job<S: EntityStore + ?Sized>(
    store: &mut S,
    halted: &HashSet<EntityId>,
    outcome: &mut CounterOutcome,
) {
    for handle in store.records_with_enabled(InstanceCount::ID) {
        if halted.contains(&handle) {
            continue;
        }
        clear_dirty::<InstanceCount, S>(store, handle);

        let count = stored::<InstanceCount, S>(store, handle).unwrap_or(0);
        if count < 0 {
            outcome.underflows.push(LifecycleError::CounterUnderflow {
                counter: InstanceCount::NAME,
                entity: handle,
            });
        } else if count == 0 && store.destroy_record(handle) {
            outcome.destroyed.push(handle);
        }
    }
}

/// Job 2: toggle suspension of every dirty record whose active state changed.
pub fn run_active_job<S: EntityStore + ?Sized>(
    store: &mut S,
    halted: &HashSet<EntityId>,
    outcome: &mut CounterOutcome,
) {
    for handle in store.records_with_enabled(ActiveCount::ID) {
        if halted.contains(&handle) {
            continue;
        }
        clear_dirty::<ActiveCount, S>(store, handle);

        let count = stored::<ActiveCount, S>(store, handle).unwrap_or(0);
        if count < 0 {
            outcome.underflows.push(LifecycleError::CounterUnderflow {
                counter: ActiveCount::NAME,
                entity: handle,
            });
            continue;
        }

        let active = count > 0;
        if store.is_suspended(handle) == Some(active) && store.set_suspended(handle, !active).is_ok() {
            if active {
                outcome.resumed += 1;
            } else {
                outcome.suspended += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ArchetypeDescriptor, ComponentLayout, RecordStore};

    fn descriptor() -> ArchetypeDescriptor {
        ArchetypeDescriptor::new([
            ComponentLayout::field::<InstanceCount>(),
            ComponentLayout::field::<ActiveCount>(),
        ])
    }

    #[test]
    fn test_add_through_pending_set() {
        let mut overlays = Overlays::default();
        let store = RecordStore::new(1);
        let placeholder = EntityId::placeholder(0);
        overlays.open(placeholder, descriptor());
        let target = Target::Pending(placeholder);

        assert_eq!(add::<InstanceCount, _>(&mut overlays, &store, target, 1), Ok(1));
        assert_eq!(add::<InstanceCount, _>(&mut overlays, &store, target, 1), Ok(2));
        assert_eq!(add::<InstanceCount, _>(&mut overlays, &store, target, -2), Ok(0));
        assert_eq!(
            add::<InstanceCount, _>(&mut overlays, &store, target, -1),
            Err(LifecycleError::CounterUnderflow {
                counter: "InstanceCount",
                entity: placeholder,
            })
        );
    }

    #[test]
    fn test_instance_job_destroys_zero_records() {
        let mut store = RecordStore::new(4);
        let keep = store.allocate_record(&descriptor()).unwrap();
        let drop_me = store.allocate_record(&descriptor()).unwrap();
        store
            .set_field(keep, InstanceCount::ID, bytemuck::bytes_of(&InstanceCount { value: 1 }))
            .unwrap();

        let mut outcome = CounterOutcome::default();
        run_instance_job(&mut store, &HashSet::new(), &mut outcome);

        assert_eq!(outcome.destroyed, vec![drop_me]);
        assert!(store.is_alive(keep));
        assert_eq!(store.is_enabled(keep, InstanceCount::ID), Some(false));
    }

    #[test]
    fn test_halted_records_are_skipped() {
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&descriptor()).unwrap();
        let halted: HashSet<_> = [handle].into_iter().collect();

        let mut outcome = CounterOutcome::default();
        run_instance_job(&mut store, &halted, &mut outcome);
        run_active_job(&mut store, &halted, &mut outcome);

        assert!(store.is_alive(handle));
        assert_eq!(outcome, CounterOutcome::default());
    }

    #[test]
    fn test_active_job_toggles_suspension() {
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&descriptor()).unwrap();

        let mut outcome = CounterOutcome::default();
        run_active_job(&mut store, &HashSet::new(), &mut outcome);
        assert_eq!(store.is_suspended(handle), Some(true));
        assert_eq!(outcome.suspended, 1);

        store
            .set_field(handle, ActiveCount::ID, bytemuck::bytes_of(&ActiveCount { value: 2 }))
            .unwrap();
        store.set_enabled(handle, ActiveCount::ID, true).unwrap();
        run_active_job(&mut store, &HashSet::new(), &mut outcome);
        assert_eq!(store.is_suspended(handle), Some(false));
        assert_eq!(outcome.resumed, 1);
    }

    #[test]
    fn test_negative_store_value_reported() {
        let mut store = RecordStore::new(2);
        let handle = store.allocate_record(&descriptor()).unwrap();
        store
            .set_field(handle, InstanceCount::ID, bytemuck::bytes_of(&InstanceCount { value: -1 }))
            .unwrap();

        let mut outcome = CounterOutcome::default();
        run_instance_job(&mut store, &HashSet::new(), &mut outcome);
        assert!(store.is_alive(handle));
        assert_eq!(outcome.underflows.len(), 1);
    }
}
