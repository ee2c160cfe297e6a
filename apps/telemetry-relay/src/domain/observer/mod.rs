//! Observer Connection Lifecycle
//!
//! Identity and state machine for live dashboard connections. The broadcast
//! hub owns every observer; nothing outside the registry holds one.
//!
//! ```text
//! Connecting ──► Registered ──► Closing ──► Removed
//!      │                                       ▲
//!      └───────────────────────────────────────┘
//! ```
//!
//! `Removed` is terminal. A client that wants to rejoin must handshake again
//! and receives a new `ObserverId`.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

// =============================================================================
// Observer Id
// =============================================================================

/// Opaque handle of one observer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(Uuid);

impl ObserverId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Liveness state of an observer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Handshake in progress.
    Connecting,
    /// Member of the registry, receiving broadcasts and probes.
    Registered,
    /// Evicted or unregistered, outbound side being closed.
    Closing,
    /// Gone for good.
    Removed,
}

impl ObserverState {
    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Registered | Self::Removed)
                | (Self::Registered, Self::Closing)
                | (Self::Closing, Self::Removed)
        )
    }

    /// Whether the connection is still eligible for writes.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Registered)
    }

    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Closing => "closing",
            Self::Removed => "removed",
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal observer transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// State before the attempted transition.
    pub from: ObserverState,
    /// Requested state.
    pub to: ObserverState,
}

/// Lifecycle bookkeeping for one observer.
#[derive(Debug, Clone)]
pub struct ObserverLifecycle {
    id: ObserverId,
    state: ObserverState,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl ObserverLifecycle {
    /// Start tracking a connection that is mid-handshake.
    #[must_use]
    pub fn connecting(id: ObserverId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: ObserverState::Connecting,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Observer identifier.
    #[must_use]
    pub const fn id(&self) -> ObserverId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ObserverState {
        self.state
    }

    /// When the handshake started.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time of the last successful write.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the move is not allowed, e.g. out of the
    /// terminal `Removed` state.
    pub fn transition(&mut self, next: ObserverState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a successful write.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
