//! Sync coordinator state machine.
//!
//! This module provides a pure, side-effect-free state machine for the sync
//! lifecycle. The state machine takes events as input and produces a new
//! state plus a list of actions to execute.
//!
//! The actual I/O (fetching, persisting, pushing) is performed by
//! sync-client, not by this module. Exactly one cycle may run at a time:
//! a request that arrives while `Syncing` is rejected, never queued.

use std::fmt;
use std::time::Duration;
use tasksync_types::{EntityKind, SyncResult};

/// Coordinator state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// No cycle in progress.
    #[default]
    Idle,
    /// One cycle running.
    Syncing {
        /// What started the cycle.
        trigger: SyncTrigger,
    },
}

impl SyncState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Idle
            (
                Self::Idle,
                Event::SyncRequested {
                    trigger,
                    remote_available: true,
                },
            ) => start(trigger),
            (
                Self::Idle,
                Event::SyncRequested {
                    remote_available: false,
                    ..
                },
            ) => (Self::Idle, vec![Action::Reject(RejectReason::RemoteUnavailable)]),
            (
                Self::Idle,
                Event::NetworkChanged {
                    status: NetworkStatus::Online,
                    remote_available: true,
                },
            ) => start(SyncTrigger::NetworkRestored),

            // From Syncing
            (state @ Self::Syncing { .. }, Event::SyncRequested { .. }) => {
                (state, vec![Action::Reject(RejectReason::AlreadyInProgress)])
            }
            (Self::Syncing { .. }, Event::CycleSucceeded { result }) => (
                Self::Idle,
                vec![Action::EmitEvent(SyncEvent::SyncCompleted(result))],
            ),
            (Self::Syncing { trigger }, Event::CycleFailed { error }) => (
                Self::Idle,
                vec![Action::EmitEvent(SyncEvent::SyncFailed { trigger, error })],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if a cycle is running.
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing { .. })
    }
}

fn start(trigger: SyncTrigger) -> (SyncState, Vec<Action>) {
    (
        SyncState::Syncing { trigger },
        vec![
            Action::StartCycle { trigger },
            Action::EmitEvent(SyncEvent::SyncStarted { trigger }),
        ],
    )
}

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTrigger {
    /// An explicit `sync_now` call.
    Manual,
    /// The auto-sync timer fired.
    AutoSync,
    /// The network came back while the remote was reachable.
    NetworkRestored,
}

impl SyncTrigger {
    /// Whether failures of this cycle are only logged, never returned.
    pub fn is_silent(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::AutoSync => write!(f, "auto-sync"),
            Self::NetworkRestored => write!(f, "network restored"),
        }
    }
}

/// Network reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkStatus {
    /// Network reachable.
    Online,
    /// Network unreachable.
    #[default]
    Offline,
}

impl NetworkStatus {
    /// Check if the network is reachable.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Events that can occur in the sync lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A cycle was requested.
    SyncRequested {
        /// Who asked.
        trigger: SyncTrigger,
        /// Whether the remote reported itself reachable.
        remote_available: bool,
    },
    /// The running cycle finished successfully.
    CycleSucceeded {
        /// Summary of the cycle.
        result: SyncResult,
    },
    /// The running cycle aborted.
    CycleFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The platform reported a network change.
    NetworkChanged {
        /// New reachability.
        status: NetworkStatus,
        /// Whether the remote reported itself reachable.
        remote_available: bool,
    },
}

/// Why a sync request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A cycle is already running.
    AlreadyInProgress,
    /// The remote cannot be reached.
    RemoteUnavailable,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run one sync cycle.
    StartCycle {
        /// What started the cycle.
        trigger: SyncTrigger,
    },
    /// Turn the request down without any state change.
    Reject(RejectReason),
    /// Emit an event to the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A cycle started.
    SyncStarted {
        /// What started the cycle.
        trigger: SyncTrigger,
    },
    /// A cycle completed; local state is durable.
    SyncCompleted(SyncResult),
    /// A cycle aborted with no local mutation committed.
    SyncFailed {
        /// What started the cycle.
        trigger: SyncTrigger,
        /// Error message describing the failure.
        error: String,
    },
    /// Pushing merged state failed; the snapshot is queued for retry.
    PushDeferred {
        /// Entity kind whose snapshot is pending.
        kind: EntityKind,
        /// Failed attempts so far.
        attempt: u32,
        /// Delay before the next attempt.
        retry_in: Duration,
    },
    /// A queued snapshot was pushed.
    PushDelivered {
        /// Entity kind that was pushed.
        kind: EntityKind,
    },
    /// A queued snapshot exhausted its attempts and was dropped.
    PushDropped {
        /// Entity kind that was dropped.
        kind: EntityKind,
        /// Attempts made before giving up.
        attempts: u32,
    },
}
