//! Integration test for wrapper lifecycles.
//!
//! Drives `SceneWorld` through attach / reconcile / detach sequences and
//! checks states, handles, counters, parent links and callbacks.

use std::cell::RefCell;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use tether_core::{
    ActiveCount, ArchetypeDescriptor, BufferElement, Component, ComponentId, ComponentLayout, EntityId,
    EntityParent, EntityStore, InstanceCount, RecordStore, StoreError,
};
use tether_scene::{
    AttachOptions, ContextId, ContextState, ContextTable, DescriptorTable, LifecycleError, LifecycleState,
    PersistedIdentity, SceneConfig, SceneWorld, TemplateKey,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct Health {
    value: u32,
}

impl Component for Health {
    const ID: ComponentId = 1;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct Waypoint {
    x: i32,
    y: i32,
}

impl BufferElement for Waypoint {
    const ID: ComponentId = 2;
}

/// Id past the record mask width.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct Beacon {
    range: u32,
}

impl Component for Beacon {
    const ID: ComponentId = 70;
}

type World = SceneWorld<RecordStore, DescriptorTable, ContextTable>;

const LEVEL: ContextId = ContextId(1);
const STREAMED: ContextId = ContextId(2);
const ORPHANED: ContextId = ContextId(3);

fn world() -> World {
    let mut contexts = ContextTable::new();
    contexts.set(LEVEL, ContextState::Loaded);
    contexts.set(STREAMED, ContextState::Loading);
    contexts.set(ORPHANED, ContextState::Invalid);

    let mut descriptors = DescriptorTable::new(ArchetypeDescriptor::empty());
    descriptors.set(LEVEL, ArchetypeDescriptor::new([ComponentLayout::field::<Health>()]));

    let config = SceneConfig {
        store_capacity: 256,
        ..SceneConfig::default()
    };
    SceneWorld::with_record_store(config, descriptors, contexts).unwrap()
}

fn waypoint(x: i32) -> Waypoint {
    Waypoint { x, y: -x }
}

#[test]
fn test_attach_creating_then_created() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    assert_eq!(world.status(token), LifecycleState::Creating);
    assert_eq!(world.handle(token), None);

    world.reconcile().unwrap();

    assert_eq!(world.status(token), LifecycleState::Created);
    let handle = world.handle(token).unwrap();
    assert!(world.store().is_alive(handle));
    assert!(handle.is_record());
    assert!(world.store().has_field(handle, Health::ID));
}

#[test]
fn test_deferred_parent_and_child_converge() {
    let mut world = world();
    let parent = world.attach(AttachOptions::new(STREAMED)).unwrap();
    let child = world
        .attach(AttachOptions::new(STREAMED).with_parent(parent))
        .unwrap();
    assert_eq!(world.status(parent), LifecycleState::Deserializing);
    assert_eq!(world.status(child), LifecycleState::Deserializing);

    // Nothing materializes while the context loads.
    let report = world.reconcile().unwrap();
    assert_eq!(report.deferred, 2);
    assert_eq!(world.store().alive_count(), 0);

    world.readiness_mut().set(STREAMED, ContextState::Loaded);
    world.reconcile().unwrap();
    world.reconcile().unwrap();

    let parent_handle = world.handle(parent).unwrap();
    let child_handle = world.handle(child).unwrap();
    assert_eq!(
        world.store().buffer_of::<EntityParent>(child_handle),
        Some(vec![EntityParent { entity: parent_handle }])
    );
    assert_eq!(world.store().is_enabled(child_handle, EntityParent::ID), Some(false));
}

#[test]
fn test_child_links_placeholder_of_creating_parent() {
    let mut world = world();
    let parent = world.attach(AttachOptions::new(LEVEL)).unwrap();
    let child = world.attach(AttachOptions::new(LEVEL).with_parent(parent)).unwrap();

    let placeholder = world.wrapper(parent).unwrap().placeholder().unwrap();
    assert_eq!(
        world.get_buffer::<EntityParent>(child),
        Ok(vec![EntityParent { entity: placeholder }])
    );

    let report = world.reconcile().unwrap();
    assert_eq!(report.remapped, 1);
    assert_eq!(
        world.get_buffer::<EntityParent>(child),
        Ok(vec![EntityParent {
            entity: world.handle(parent).unwrap()
        }])
    );
}

#[test]
fn test_shared_record_active_counting() {
    let mut world = world();
    let key = TemplateKey(0xb0b);
    let a = world
        .attach(AttachOptions::new(LEVEL).with_template(key).disabled())
        .unwrap();
    let b = world
        .attach(AttachOptions::new(LEVEL).with_template(key).disabled())
        .unwrap();
    world.reconcile().unwrap();

    let handle = world.handle(a).unwrap();
    assert_eq!(world.handle(b), Some(handle));
    assert_eq!(world.store().is_suspended(handle), Some(true));

    world.enable(a).unwrap();
    world.enable(b).unwrap();
    assert_eq!(world.get::<ActiveCount>(a), Ok(ActiveCount { value: 2 }));
    let report = world.reconcile().unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(world.store().is_suspended(handle), Some(false));

    world.disable(a).unwrap();
    assert_eq!(world.get::<ActiveCount>(b), Ok(ActiveCount { value: 1 }));
    world.reconcile().unwrap();
    assert_eq!(world.store().is_suspended(handle), Some(false));

    world.disable(b).unwrap();
    assert_eq!(world.get::<ActiveCount>(b), Ok(ActiveCount { value: 0 }));
    let report = world.reconcile().unwrap();
    assert_eq!(report.suspended, 1);
    assert_eq!(world.store().is_suspended(handle), Some(true));
    assert_eq!(world.store().component::<InstanceCount>(handle), Some(InstanceCount { value: 2 }));
}

#[test]
fn test_pending_writes_survive_materialization() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();

    world.set(token, Health { value: 42 }).unwrap();
    world
        .append_buffer(token, &[waypoint(3), waypoint(1), waypoint(2)])
        .unwrap();
    world.append_buffer_unique(token, &[waypoint(1), waypoint(4)]).unwrap();
    world.set_enabled::<Health>(token, false).unwrap();
    world.set(token, Health { value: 43 }).unwrap();

    let expected = vec![waypoint(3), waypoint(1), waypoint(2), waypoint(4)];
    assert_eq!(world.get::<Health>(token), Ok(Health { value: 43 }));
    assert_eq!(world.get_buffer::<Waypoint>(token), Ok(expected.clone()));

    world.reconcile().unwrap();
    let handle = world.handle(token).unwrap();

    assert_eq!(world.store().component::<Health>(handle), Some(Health { value: 43 }));
    assert_eq!(world.store().buffer_of::<Waypoint>(handle), Some(expected.clone()));
    // The toggle was queued before the last write but still applies last.
    assert_eq!(world.store().is_enabled(handle, Health::ID), Some(false));
    assert_eq!(world.get_buffer::<Waypoint>(token), Ok(expected));
}

#[test]
fn test_instance_overlay_reads_before_playback() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    world.set(token, Health { value: 1 }).unwrap();
    world.reconcile().unwrap();
    let handle = world.handle(token).unwrap();

    world.set(token, Health { value: 2 }).unwrap();
    world.append_buffer(token, &[waypoint(9)]).unwrap();
    assert_eq!(world.store().component::<Health>(handle), Some(Health { value: 1 }));
    assert_eq!(world.get::<Health>(token), Ok(Health { value: 2 }));
    assert_eq!(world.try_get_buffer_element::<Waypoint>(token, 0), Ok(Some(waypoint(9))));
    assert_eq!(world.pending_playback(), 1);

    let report = world.reconcile().unwrap();
    assert_eq!(report.played_back, 2);
    assert_eq!(world.store().component::<Health>(handle), Some(Health { value: 2 }));
    assert_eq!(world.pending_playback(), 0);
}

#[test]
fn test_deferred_wrapper_waits_for_context() {
    let mut world = world();
    let token = world
        .attach(AttachOptions::new(STREAMED).with_persisted(PersistedIdentity(b"door-17".to_vec())))
        .unwrap();
    let plain = world.attach(AttachOptions::new(STREAMED)).unwrap();

    for _ in 0..3 {
        world.reconcile().unwrap();
        assert_eq!(world.status(plain), LifecycleState::Deserializing);
    }
    // A bound identity skips the readiness check.
    assert_eq!(world.status(token), LifecycleState::Created);

    world.readiness_mut().set(STREAMED, ContextState::Loaded);
    world.reconcile().unwrap();
    assert_eq!(world.status(plain), LifecycleState::Created);
    assert_eq!(world.stats().deferrals, 3);
}

#[test]
fn test_orphaned_context_invalidates() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(ORPHANED)).unwrap();
    assert_eq!(world.status(token), LifecycleState::Invalid);
    assert!(matches!(
        world.set(token, Health { value: 1 }),
        Err(LifecycleError::InvalidLifecycleState {
            status: LifecycleState::Invalid,
            ..
        })
    ));
    assert!(matches!(
        world.register_on_created(token, |_| {}),
        Err(LifecycleError::InvalidLifecycleState { .. })
    ));

    world.reconcile().unwrap();
    assert_eq!(world.store().alive_count(), 0);
    world.detach(token).unwrap();
    assert!(world.wrapper(token).is_none());
}

#[test]
fn test_context_invalidated_while_deferred() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(STREAMED)).unwrap();
    world.readiness_mut().set(STREAMED, ContextState::Invalid);

    let report = world.reconcile().unwrap();
    assert_eq!(report.invalidated, 1);
    assert_eq!(world.status(token), LifecycleState::Invalid);
    assert!(world.queues().is_idle());
}

#[test]
fn test_counter_underflow_halts_record() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    world.reconcile().unwrap();
    let handle = world.handle(token).unwrap();

    // Simulate a double dispose: the record already lost its only owner.
    world
        .store_mut()
        .set_field(handle, InstanceCount::ID, bytemuck::bytes_of(&InstanceCount { value: 0 }))
        .unwrap();
    world.detach(token).unwrap();

    assert_eq!(
        world.reconcile(),
        Err(LifecycleError::CounterUnderflow {
            counter: "InstanceCount",
            entity: handle,
        })
    );
    assert!(world.is_halted(handle));
    assert!(world.store().is_alive(handle));
    assert_eq!(world.stats().underflows, 1);

    // Halted records are left alone by later passes.
    world.reconcile().unwrap();
    assert!(world.store().is_alive(handle));
}

#[test]
fn test_callbacks_run_once_and_after_rebuild() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    let seen: Rc<RefCell<Vec<EntityId>>> = Rc::default();
    let sink = Rc::clone(&seen);
    world
        .register_on_created(token, move |handle| sink.borrow_mut().push(handle))
        .unwrap();

    world.reconcile().unwrap();
    world.reconcile().unwrap();
    let first = world.handle(token).unwrap();
    assert_eq!(*seen.borrow(), vec![first]);

    world.rebuild(token).unwrap();
    world.reconcile().unwrap();
    let second = world.handle(token).unwrap();
    assert_eq!(*seen.borrow(), vec![first, second]);

    let late: Rc<RefCell<Vec<EntityId>>> = Rc::default();
    let late_sink = Rc::clone(&late);
    world
        .register_on_created(token, move |handle| late_sink.borrow_mut().push(handle))
        .unwrap();
    assert_eq!(*late.borrow(), vec![second]);
}

#[test]
fn test_detached_before_materialization_never_calls_back() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    let called = Rc::new(RefCell::new(false));
    let flag = Rc::clone(&called);
    world
        .register_on_created(token, move |_| *flag.borrow_mut() = true)
        .unwrap();
    world.detach(token).unwrap();

    let report = world.reconcile().unwrap();
    assert_eq!(report.created, 0);
    assert!(!*called.borrow());
    assert_eq!(world.status(token), LifecycleState::Destroyed);
    assert_eq!(world.store().alive_count(), 0);
}

#[test]
fn test_requeue_from_other_thread_is_idempotent() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(STREAMED)).unwrap();

    let queues = world.queues();
    std::thread::spawn(move || {
        for _ in 0..4 {
            queues.push_deserialize(token);
        }
    })
    .join()
    .unwrap();

    world.readiness_mut().set(STREAMED, ContextState::Loaded);
    let report = world.reconcile().unwrap();
    assert_eq!(report.materialized, 1);
    assert_eq!(report.deserialized, 1);
    assert_eq!(world.store().alive_count(), 1);
    assert!(world.queues().is_idle());
}

#[test]
fn test_descriptor_change_rebuilds_created_wrapper() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    world.reconcile().unwrap();
    let old = world.handle(token).unwrap();
    assert_eq!(world.refresh_descriptor(token), Ok(false));

    world.descriptors_mut().set(
        LEVEL,
        ArchetypeDescriptor::new([
            ComponentLayout::field::<Health>(),
            ComponentLayout::buffer::<Waypoint>(),
        ]),
    );
    assert_eq!(world.refresh_descriptor(token), Ok(true));
    assert_eq!(world.status(token), LifecycleState::Creating);

    world.reconcile().unwrap();
    let new = world.handle(token).unwrap();
    assert_ne!(old, new);
    assert!(!world.store().is_alive(old));
    assert_eq!(world.store().buffer_of::<Waypoint>(new), Some(Vec::new()));
}

fn with_waypoints() -> ArchetypeDescriptor {
    ArchetypeDescriptor::new([
        ComponentLayout::field::<Health>(),
        ComponentLayout::buffer::<Waypoint>(),
    ])
}

#[test]
fn test_descriptor_change_while_creating_reaches_record() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    assert_eq!(world.status(token), LifecycleState::Creating);

    world.descriptors_mut().set(LEVEL, with_waypoints());
    assert_eq!(world.refresh_descriptor(token), Ok(true));
    assert_eq!(world.status(token), LifecycleState::Creating);

    world.reconcile().unwrap();
    let handle = world.handle(token).unwrap();
    assert_eq!(world.store().buffer_of::<Waypoint>(handle), Some(Vec::new()));
    assert_eq!(world.refresh_descriptor(token), Ok(false));
}

#[test]
fn test_descriptor_change_on_shared_pending_record_rebuilds_later() {
    let mut world = world();
    let key = TemplateKey(11);
    let a = world.attach(AttachOptions::new(LEVEL).with_template(key)).unwrap();
    let b = world.attach(AttachOptions::new(LEVEL).with_template(key)).unwrap();

    world.descriptors_mut().set(LEVEL, with_waypoints());
    assert_eq!(world.refresh_descriptor(a), Ok(true));

    world.reconcile().unwrap();
    let shared = world.handle(a).unwrap();
    assert_eq!(world.handle(b), Some(shared));
    assert_eq!(world.store().buffer_of::<Waypoint>(shared), None);

    // The change is still pending for `a` and is applied by a rebuild.
    assert_eq!(world.refresh_descriptor(a), Ok(true));
    world.reconcile().unwrap();
    let own = world.handle(a).unwrap();
    assert_ne!(own, shared);
    assert_eq!(world.store().buffer_of::<Waypoint>(own), Some(Vec::new()));
    assert_eq!(world.store().component::<InstanceCount>(shared), Some(InstanceCount { value: 1 }));
}

#[test]
fn test_sole_owner_template_rebuild_replaces_record() {
    let mut world = world();
    let token = world
        .attach(AttachOptions::new(LEVEL).with_template(TemplateKey(1)))
        .unwrap();
    world.reconcile().unwrap();
    let old = world.handle(token).unwrap();

    world.rebuild(token).unwrap();
    let report = world.reconcile().unwrap();
    let new = world.handle(token).unwrap();
    assert_ne!(old, new);
    assert_eq!(report.destroyed, vec![old]);
    assert!(!world.store().is_alive(old));

    // Later wrappers with the key join the new record.
    let joiner = world
        .attach(AttachOptions::new(LEVEL).with_template(TemplateKey(1)))
        .unwrap();
    world.reconcile().unwrap();
    assert_eq!(world.handle(joiner), Some(new));
}

#[test]
fn test_component_id_past_mask_width_never_queued() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    let rejected = LifecycleError::Store(StoreError::InvalidComponentId(Beacon::ID));

    assert_eq!(world.set(token, Beacon { range: 9 }), Err(rejected.clone()));
    assert_eq!(world.try_get::<Beacon>(token), Err(rejected.clone()));

    let report = world.reconcile().unwrap();
    assert_eq!(report.command_failures, 0);
    assert_eq!(world.status(token), LifecycleState::Created);
    assert_eq!(world.try_get::<Beacon>(token), Err(rejected.clone()));
    assert_eq!(world.set(token, Beacon { range: 1 }), Err(rejected));
    assert_eq!(world.pending_playback(), 0);
}

#[test]
fn test_refused_flush_is_returned_from_pass() {
    let mut world = world();
    let token = world.attach(AttachOptions::new(LEVEL)).unwrap();
    world.remove_component::<Health>(token).unwrap();
    world.set_enabled::<Health>(token, true).unwrap();

    let result = world.reconcile();
    assert!(
        matches!(
            result,
            Err(LifecycleError::Store(StoreError::MissingComponent { component: 1, .. }))
        ),
        "got {result:?}"
    );
    assert_eq!(world.status(token), LifecycleState::Created);
    assert_eq!(world.try_get::<Health>(token), Ok(None));

    world.reconcile().unwrap();
}
