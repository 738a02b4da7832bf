//! # Lifecycle Queues
//!
//! The only state mutated from several threads at once:
//!
//! ```text
//!   any thread                        reconciliation pass
//!   ──────────                        ───────────────────
//!   push_deserialize(token) ──► [deserialize] ──► take_deserialize()
//!   push_disposal(record)   ──► [disposal]    ──► take_disposals()
//!        ▲                                              │
//!        └──────── pop ◄── [free pool] ◄── recycle ◄────┘
//! ```
//!
//! All three are [`AtomicStack`]s: CAS push, whole-list take, no mutex.
//! Share them across threads through [`SceneWorld::queues`](crate::SceneWorld::queues).

use tether_core::{AtomicStack, Drain, EntityId, Node};

use crate::status::LifecycleState;
use crate::wrapper::WrapperToken;

/// Snapshot of a detached wrapper, enough to release its counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisposalRecord {
    /// Status the wrapper had when it was detached.
    pub status: LifecycleState,
    /// Record handle (`Created`) or placeholder (`Creating`).
    pub target: EntityId,
    /// Whether the wrapper was counted in the active count.
    pub was_active: bool,
}

impl Default for DisposalRecord {
    fn default() -> Self {
        Self {
            status: LifecycleState::Destroyed,
            target: EntityId::NULL,
            was_active: false,
        }
    }
}

/// Shared lifecycle queues.
///
/// # Thread Safety
///
/// `LifecycleQueues` is `Send + Sync`; any thread may push. Takes are made
/// by the reconciliation pass only.
pub struct LifecycleQueues {
    deserialize: AtomicStack<WrapperToken>,
    disposal: AtomicStack<DisposalRecord>,
    free_pool: AtomicStack<DisposalRecord>,
}

impl LifecycleQueues {
    /// Creates empty queues with `prewarm` recycled disposal nodes.
    #[must_use]
    pub fn new(prewarm: usize) -> Self {
        let queues = Self {
            deserialize: AtomicStack::new(),
            disposal: AtomicStack::new(),
            free_pool: AtomicStack::new(),
        };
        for _ in 0..prewarm {
            queues.free_pool.push(DisposalRecord::default());
        }
        queues
    }

    /// Queues a wrapper for the deserialize drain.
    pub fn push_deserialize(&self, token: WrapperToken) {
        self.deserialize.push(token);
    }

    /// Detaches every queued wrapper token.
    pub fn take_deserialize(&self) -> Drain<WrapperToken> {
        self.deserialize.take_all()
    }

    /// Queues a disposal, reusing a pooled node when one is free.
    pub fn push_disposal(&self, record: DisposalRecord) {
        let node = match self.free_pool.pop_node() {
            Some(mut node) => {
                node.replace(record);
                node
            }
            None => Node::new(record),
        };
        self.disposal.push_node(node);
    }

    /// Detaches every queued disposal.
    pub fn take_disposals(&self) -> Drain<DisposalRecord> {
        self.disposal.take_all()
    }

    /// Returns a drained disposal node to the free pool.
    pub fn recycle(&self, mut node: Box<Node<DisposalRecord>>) {
        node.replace(DisposalRecord::default());
        self.free_pool.push_node(node);
    }

    /// Whether neither request queue holds work.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.deserialize.is_empty() && self.disposal.is_empty()
    }

    /// Whether the free pool currently has no node.
    #[must_use]
    pub fn free_pool_is_empty(&self) -> bool {
        self.free_pool.is_empty()
    }
}

impl Default for LifecycleQueues {
    fn default() -> Self {
        Self::new(0)
    }
}
