//! # Deferred Materialization Callbacks
//!
//! Records are materialized inside the reconciliation pass, but wrapper
//! callbacks must run on the control thread. Materialization therefore only
//! sends a [`Materialized`] message; the control thread drains the channel
//! after the pass and resolves each token with a generation check.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tether_core::EntityId;

use crate::wrapper::WrapperToken;

/// Callback run once a wrapper's record exists. Receives the record handle.
pub type OnCreated = Box<dyn FnMut(EntityId)>;

/// Notification that a wrapper's record was materialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Materialized {
    /// Wrapper awaiting the record.
    pub token: WrapperToken,
    /// The real handle.
    pub handle: EntityId,
    /// Placeholder the wrapper requested the record under.
    pub placeholder: EntityId,
}

/// Unbounded MPSC channel carrying [`Materialized`] messages.
///
/// Senders are cheap to clone and can be handed to worker threads.
pub struct CallbackChannel {
    sender: Sender<Materialized>,
    receiver: Receiver<Materialized>,
}

impl CallbackChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// A sender for materialization workers.
    #[must_use]
    pub fn sender(&self) -> Sender<Materialized> {
        self.sender.clone()
    }

    /// Sends a notification. Never blocks.
    pub fn notify(&self, message: Materialized) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(message);
    }

    /// Takes every pending notification, in send order.
    pub fn drain(&self) -> impl Iterator<Item = Materialized> + '_ {
        self.receiver.try_iter()
    }

    /// Number of undelivered notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no notification is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for CallbackChannel {
    fn default() -> Self {
        Self::new()
    }
}
