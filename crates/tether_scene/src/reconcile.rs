//! # Reconciliation Pass
//!
//! Run once per synchronization point. The pass holds the entity store
//! exclusively and always runs its steps in this order:
//!
//! ```text
//!   1. disposal drain      release counters of detached wrappers
//!   2. deserialize drain   move ready wrappers to Creating, defer the rest
//!   3. materialization     allocate pending records, flush pending sets,
//!                          play back the instance overlay
//!   4. counter jobs        destroy ownerless records, (un)suspend records
//!   5. parent remap        rewrite placeholder parent links
//!   6. callback drain      Creating -> Created, run on-created callbacks
//! ```
//!
//! Deferred work is retried every pass. A counter underflow halts the
//! affected record; the pass still completes and returns the first such
//! fault.

use tether_core::{
    ActiveCount, BufferElement, Component, EntityId, EntityParent, EntityStore, InstanceCount, Node,
};
use tracing::{debug, info, trace, warn};

use crate::callbacks::Materialized;
use crate::context::{ContextReadiness, DescriptorSource};
use crate::counters::{self, CounterOutcome};
use crate::error::{LifecycleError, LifecycleResult};
use crate::overlay::Target;
use crate::queues::DisposalRecord;
use crate::status::LifecycleState;
use crate::world::BuildOutcome;
use crate::wrapper::WrapperToken;
use crate::SceneWorld;

/// What one pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Disposal records drained.
    pub disposed: usize,
    /// `Deserializing` wrappers examined.
    pub deserialized: usize,
    /// Wrappers re-queued because their context or parent was not ready.
    pub deferred: usize,
    /// Wrappers moved to `Invalid`.
    pub invalidated: usize,
    /// Records allocated from pending sets.
    pub materialized: usize,
    /// Pending commands flushed into new records.
    pub flushed_commands: usize,
    /// Instance-overlay commands played back.
    pub played_back: usize,
    /// Flushes, playbacks or flag resets that hit a store error.
    pub command_failures: usize,
    /// Records destroyed by the instance-count job.
    pub destroyed: Vec<EntityId>,
    /// Records suspended by the active-count job.
    pub suspended: usize,
    /// Records resumed by the active-count job.
    pub resumed: usize,
    /// Parent-link elements rewritten to real handles.
    pub remapped: usize,
    /// Parent links marked clean.
    pub links_cleaned: usize,
    /// Links reported as long unresolved. Not fatal.
    pub unresolved: Vec<LifecycleError>,
    /// Wrappers that entered `Created`.
    pub created: usize,
    /// On-created callbacks run.
    pub callbacks_run: usize,
}

/// Running totals across passes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    /// Passes run.
    pub passes: u64,
    /// Records allocated.
    pub records_materialized: u64,
    /// Records destroyed.
    pub records_destroyed: u64,
    /// Wrappers that entered `Created`.
    pub wrappers_created: u64,
    /// Wrappers moved to `Invalid`.
    pub wrappers_invalidated: u64,
    /// Deferrals in the deserialize drain.
    pub deferrals: u64,
    /// On-created callbacks run.
    pub callbacks_run: u64,
    /// Counter underflows detected.
    pub underflows: u64,
}

impl<S, D, R> SceneWorld<S, D, R>
where
    S: EntityStore,
    D: DescriptorSource,
    R: ContextReadiness,
{
    /// Runs one reconciliation pass.
    ///
    /// # Errors
    ///
    /// The first fault of the pass: [`LifecycleError::CounterUnderflow`]
    /// (the record is halted), [`LifecycleError::StoreExhausted`] (the
    /// pending record is retried next pass) or [`LifecycleError::Store`] for
    /// a queued write the store refused. Every step still runs.
    pub fn reconcile(&mut self) -> LifecycleResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut faults = Vec::new();

        self.release_retired();
        self.drain_disposals(&mut report, &mut faults);
        self.drain_deserialize(&mut report, &mut faults);
        self.materialize(&mut report, &mut faults);
        self.run_counter_jobs(&mut report, &mut faults);
        self.remap_parents(&mut report);
        self.drain_callbacks(&mut report);

        self.stats.passes += 1;
        self.stats.records_materialized += report.materialized as u64;
        self.stats.records_destroyed += report.destroyed.len() as u64;
        self.stats.wrappers_created += report.created as u64;
        self.stats.deferrals += report.deferred as u64;
        self.stats.callbacks_run += report.callbacks_run as u64;

        debug!(
            "Pass {}: {} disposed, {} materialized, {} created, {} destroyed, {} deferred",
            self.stats.passes,
            report.disposed,
            report.materialized,
            report.created,
            report.destroyed.len(),
            report.deferred
        );

        match faults.into_iter().next() {
            Some(fault) => Err(fault),
            None => Ok(report),
        }
    }

    fn release_retired(&mut self) {
        for token in std::mem::take(&mut self.retired) {
            self.wrappers.remove(token);
        }
    }

    fn live_record(&self, handle: EntityId) -> bool {
        self.store.is_alive(handle) && !self.halted.contains(&handle)
    }

    /// Where a disposal lands, `None` if nothing is left to release.
    ///
    /// A `Creating` wrapper releases through its placeholder, a `Created`
    /// one through its handle.
    fn disposal_target(&self, record: &DisposalRecord) -> Option<Target> {
        let entity = record.target;
        match record.status {
            LifecycleState::Creating if entity.is_placeholder() => {
                if let Some(handle) = self.overlays.resolve(entity) {
                    return self.live_record(handle).then_some(Target::Record {
                        handle,
                        placeholder: entity,
                    });
                }
                self.overlays.pending(entity).map(|_| Target::Pending(entity))
            }
            LifecycleState::Created if entity.is_record() => {
                self.live_record(entity).then_some(Target::Record {
                    handle: entity,
                    placeholder: EntityId::NULL,
                })
            }
            status => {
                warn!("Disposal of {:?} from {} carries no releasable target", entity, status);
                None
            }
        }
    }

    // =========================================================================
    // 1. Disposal drain
    // =========================================================================

    fn drain_disposals(&mut self, report: &mut ReconcileReport, faults: &mut Vec<LifecycleError>) {
        for node in self.queues.take_disposals() {
            let record = *node.value();
            self.queues.recycle(node);
            report.disposed += 1;

            let Some(target) = self.disposal_target(&record) else {
                trace!("Disposal of {:?} has nothing left to release", record.target);
                continue;
            };
            match self.release(target, record.was_active) {
                Ok(0) => {
                    if let Target::Pending(placeholder) = target {
                        self.discard_if_orphaned(placeholder);
                    }
                }
                Ok(_) => {}
                Err(error) => faults.push(error),
            }
        }
    }

    fn discard_if_orphaned(&mut self, placeholder: EntityId) {
        if self
            .overlays
            .pending(placeholder)
            .is_some_and(|set| set.waiters().is_empty())
        {
            self.overlays.take_pending(placeholder);
            debug!("Pending record {:?} discarded: no owners left", placeholder);
        }
    }

    // =========================================================================
    // 2. Deserialize drain
    // =========================================================================

    fn drain_deserialize(&mut self, report: &mut ReconcileReport, faults: &mut Vec<LifecycleError>) {
        let invalidated_before = self.stats.wrappers_invalidated;
        let mut tokens: Vec<WrapperToken> = self.queues.take_deserialize().map(Node::into_inner).collect();
        // The stack hands entries back newest first.
        tokens.reverse();

        for token in tokens {
            if self.status(token) != LifecycleState::Deserializing {
                continue;
            }
            report.deserialized += 1;
            match self.try_build(token) {
                Ok(BuildOutcome::Deferred) => {
                    report.deferred += 1;
                    self.queues.push_deserialize(token);
                    trace!("Wrapper {:?} deferred", token);
                }
                Ok(BuildOutcome::Ready | BuildOutcome::Invalid) => {}
                Err(error) => faults.push(error),
            }
        }

        report.invalidated = usize::try_from(self.stats.wrappers_invalidated - invalidated_before).unwrap_or(usize::MAX);
    }

    // =========================================================================
    // 3. Materialization
    // =========================================================================

    fn materialize(&mut self, report: &mut ReconcileReport, faults: &mut Vec<LifecycleError>) {
        for placeholder in self.overlays.pending_placeholders() {
            let Some(set) = self.overlays.take_pending(placeholder) else {
                continue;
            };
            let handle = match self.store.allocate_record(set.descriptor()) {
                Ok(handle) => handle,
                Err(error) => {
                    let error = LifecycleError::from(error);
                    warn!("Record for {:?} not allocated: {}", placeholder, error);
                    self.overlays.put_back(placeholder, set);
                    let exhausted = matches!(error, LifecycleError::StoreExhausted { .. });
                    faults.push(error);
                    if exhausted {
                        break;
                    }
                    continue;
                }
            };

            // Bookkeeping starts clean; the flushed toggles mark what is dirty.
            for component in [InstanceCount::ID, ActiveCount::ID, EntityParent::ID] {
                if !set.descriptor().contains(component) {
                    continue;
                }
                if let Err(error) = self.store.set_enabled(handle, component, false) {
                    report.command_failures += 1;
                    warn!("Clearing bookkeeping {} on {:?}: {}", component, handle, error);
                }
            }
            if let Err(error) = set.queue().apply(&mut self.store, handle) {
                report.command_failures += 1;
                warn!("Flushing {:?} into {:?}: {}", placeholder, handle, error);
                faults.push(error.into());
            }
            report.flushed_commands += set.queue().len();

            self.overlays.bind(placeholder, handle);
            for &token in set.waiters() {
                self.callbacks.notify(Materialized {
                    token,
                    handle,
                    placeholder,
                });
            }
            report.materialized += 1;
        }

        for adoption in std::mem::take(&mut self.adoptions) {
            self.callbacks.notify(adoption);
        }

        for (handle, queue) in self.overlays.take_instance_queues() {
            if !self.live_record(handle) {
                trace!("Dropping {} queued writes for {:?}", queue.len(), handle);
                continue;
            }
            if let Err(error) = queue.apply(&mut self.store, handle) {
                report.command_failures += 1;
                warn!("Playing back writes into {:?}: {}", handle, error);
                faults.push(error.into());
            }
            report.played_back += queue.len();
        }
    }

    // =========================================================================
    // 4. Counter jobs
    // =========================================================================

    fn run_counter_jobs(&mut self, report: &mut ReconcileReport, faults: &mut Vec<LifecycleError>) {
        let mut outcome = CounterOutcome::default();

        counters::run_instance_job(&mut self.store, &self.halted, &mut outcome);
        for &handle in &outcome.destroyed {
            self.overlays.forget_record(handle);
            info!("Record {:?} destroyed: no owners left", handle);
        }
        let overlays = &self.overlays;
        self.templates.retain(|_, shared| {
            overlays.pending(shared.target).is_some() || overlays.resolve(shared.target).is_some()
        });

        counters::run_active_job(&mut self.store, &self.halted, &mut outcome);

        for error in outcome.underflows {
            if let LifecycleError::CounterUnderflow { entity, .. } = error {
                self.halt(
                    Target::Record {
                        handle: entity,
                        placeholder: EntityId::NULL,
                    },
                    &error,
                );
            }
            faults.push(error);
        }

        report.destroyed = outcome.destroyed;
        report.suspended = outcome.suspended;
        report.resumed = outcome.resumed;
    }

    // =========================================================================
    // 5. Parent remap
    // =========================================================================

    fn remap_parents(&mut self, report: &mut ReconcileReport) {
        let settings = self.config.remap_settings();
        let outcome = self
            .remap
            .run(&mut self.store, self.overlays.resolved(), &self.halted, settings);
        report.remapped = outcome.rewritten;
        report.links_cleaned = outcome.cleaned;
        report.unresolved = outcome.unresolved;
    }

    // =========================================================================
    // 6. Callback drain
    // =========================================================================

    fn drain_callbacks(&mut self, report: &mut ReconcileReport) {
        let messages: Vec<Materialized> = self.callbacks.drain().collect();
        for message in messages {
            let Some(wrapper) = self.wrappers.get_mut(message.token) else {
                trace!("Materialization of {:?} for a released wrapper", message.handle);
                continue;
            };
            if wrapper.status != LifecycleState::Creating || wrapper.placeholder != message.placeholder {
                trace!("Stale materialization of {:?} for {:?}", message.handle, message.token);
                continue;
            }
            if !self.store.is_alive(message.handle) {
                warn!(
                    "Record {:?} for wrapper {:?} died before its callbacks ran",
                    message.handle, message.token
                );
                continue;
            }

            wrapper.enter_created(message.handle);
            for callback in &mut wrapper.on_created {
                callback(message.handle);
                report.callbacks_run += 1;
            }
            report.created += 1;
        }
    }
}
