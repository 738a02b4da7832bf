//! # Lifecycle States
//!
//! ```text
//!   None ──► Deserializing ──► Creating ──► Created
//!     │            │              ▲  │         │
//!     │            ▼              │  │         │ rebuild
//!     │         Invalid           └──┼─────────┘
//!     └──────────────────────────────┴──► Destroyed
//! ```
//!
//! Transitions are strictly forward except the explicit rebuild edge
//! `Created -> Creating`.

use std::fmt;

/// Lifecycle of one scene-object wrapper.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, lifecycle not started.
    #[default]
    None,
    /// Restored from persisted state, waiting for its context.
    Deserializing,
    /// Descriptor computed, record requested but not yet materialized.
    Creating,
    /// Record materialized; the wrapper owns a real handle.
    Created,
    /// Detached. Terminal.
    Destroyed,
    /// Context can never become valid. Terminal; no record is ever created.
    Invalid,
}

impl LifecycleState {
    /// Whether no further transition is possible.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Invalid)
    }

    /// Whether typed data operations are accepted.
    #[inline]
    #[must_use]
    pub const fn accepts_commands(self) -> bool {
        matches!(self, Self::Creating | Self::Created)
    }

    /// Whether `self -> next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::None, Self::Deserializing | Self::Creating | Self::Invalid | Self::Destroyed)
                | (Self::Deserializing, Self::Creating | Self::Invalid | Self::Destroyed)
                | (Self::Creating, Self::Created | Self::Destroyed)
                | (Self::Created, Self::Creating | Self::Destroyed)
        )
    }

    /// Static name for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Deserializing => "Deserializing",
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::Destroyed => "Destroyed",
            Self::Invalid => "Invalid",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
