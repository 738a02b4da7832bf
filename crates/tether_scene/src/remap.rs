//! # Parent Link Remap
//!
//! A child may link to its parent before the parent's record exists. The
//! link then holds the parent's placeholder and stays dirty (enabled) until
//! a pass finds that placeholder in the lookup table and rewrites it.
//!
//! Links never share state, so they are resolved in parallel against the
//! read-only lookup table and written back serially.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tether_core::{BufferElement, ComponentLayout, EntityId, EntityParent, EntityStore};
use tracing::warn;

use crate::error::LifecycleError;

/// Resolution of one child's link list.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LinkResult {
    child: EntityId,
    parents: Vec<EntityParent>,
    rewritten: usize,
    clean: bool,
}

/// Rewrites placeholders that have a real handle.
///
/// # Returns
///
/// `(rewritten, clean)` where `clean` means every element is now a real handle.
fn resolve_links(parents: &mut [EntityParent], resolved: &HashMap<EntityId, EntityId>) -> (usize, bool) {
    let mut rewritten = 0;
    let mut clean = true;
    for parent in parents {
        if let Some(&handle) = resolved.get(&parent.entity) {
            parent.entity = handle;
            rewritten += 1;
        } else {
            clean &= !parent.entity.is_placeholder();
        }
    }
    (rewritten, clean)
}

fn resolve_chunk(chunk: &[(EntityId, Vec<EntityParent>)], resolved: &HashMap<EntityId, EntityId>) -> Vec<LinkResult> {
    chunk
        .iter()
        .map(|(child, parents)| {
            let mut parents = parents.clone();
            let (rewritten, clean) = resolve_links(&mut parents, resolved);
            LinkResult {
                child: *child,
                parents,
                rewritten,
                clean,
            }
        })
        .collect()
}

/// Outcome of one remap pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemapOutcome {
    /// Link elements rewritten from placeholder to handle.
    pub rewritten: usize,
    /// Links marked clean.
    pub cleaned: usize,
    /// Links that just crossed the unresolved warning threshold.
    pub unresolved: Vec<LifecycleError>,
}

/// Parallel remap tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemapSettings {
    /// Worker threads used above the threshold.
    pub workers: usize,
    /// Minimum dirty links before going parallel.
    pub parallel_threshold: usize,
    /// Passes a link may stay dirty before it is reported.
    pub warn_after: u32,
}

/// Remap pass state: how long each link has been dirty.
#[derive(Debug, Default)]
pub struct ParentRemap {
    dirty_passes: HashMap<EntityId, u32>,
}

impl ParentRemap {
    /// Creates the pass with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes a child's link has been dirty, if it is.
    #[must_use]
    pub fn dirty_passes(&self, child: EntityId) -> Option<u32> {
        self.dirty_passes.get(&child).copied()
    }

    /// Resolves every dirty link.
    pub fn run<S: EntityStore + ?Sized>(
        &mut self,
        store: &mut S,
        resolved: &HashMap<EntityId, EntityId>,
        halted: &HashSet<EntityId>,
        settings: RemapSettings,
    ) -> RemapOutcome {
        let links: Vec<(EntityId, Vec<EntityParent>)> = store
            .records_with_enabled(EntityParent::ID)
            .into_iter()
            .filter(|child| !halted.contains(child))
            .filter_map(|child| {
                let view = store.buffer(child, EntityParent::ID)?;
                Some((child, view.to_vec::<EntityParent>()))
            })
            .collect();

        let mut results = if settings.workers > 1 && links.len() >= settings.parallel_threshold {
            let collected = Mutex::new(Vec::with_capacity(links.len()));
            let chunk_size = links.len().div_ceil(settings.workers).max(1);
            std::thread::scope(|scope| {
                for chunk in links.chunks(chunk_size) {
                    let collected = &collected;
                    scope.spawn(move || {
                        let local = resolve_chunk(chunk, resolved);
                        collected.lock().extend(local);
                    });
                }
            });
            collected.into_inner()
        } else {
            resolve_chunk(&links, resolved)
        };
        results.sort_unstable_by_key(|result| result.child);

        let layout = ComponentLayout::buffer::<EntityParent>();
        let mut outcome = RemapOutcome::default();
        for result in results {
            if result.rewritten > 0
                && store
                    .set_buffer(result.child, layout, bytemuck::cast_slice(&result.parents))
                    .is_ok()
            {
                outcome.rewritten += result.rewritten;
            }

            if result.clean {
                if let Err(error) = store.set_enabled(result.child, EntityParent::ID, false) {
                    warn!("Parent link of {:?} stays dirty: {}", result.child, error);
                }
                self.dirty_passes.remove(&result.child);
                outcome.cleaned += 1;
                continue;
            }

            let passes = self.dirty_passes.entry(result.child).or_insert(0);
            *passes += 1;
            if *passes == settings.warn_after {
                warn!(
                    "Parent link of {:?} still unresolved after {} passes",
                    result.child, passes
                );
                outcome.unresolved.push(LifecycleError::UnresolvedParent {
                    child: result.child,
                    passes: *passes,
                });
            }
        }

        self.dirty_passes.retain(|child, _| store.is_alive(*child));
        outcome
    }
}
