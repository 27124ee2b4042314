//! Sync error taxonomy.

use crate::source::SourceError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Phase of a sync cycle, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Reading the local store.
    LoadLocal,
    /// Fetching remote changes.
    Fetch,
    /// Resolving conflicts on the remote.
    ResolveConflicts,
    /// Writing the merged state locally.
    Persist,
    /// Pushing the merged state to the remote.
    Push,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadLocal => write!(f, "loading local data"),
            Self::Fetch => write!(f, "fetching remote changes"),
            Self::ResolveConflicts => write!(f, "resolving conflicts"),
            Self::Persist => write!(f, "saving merged data"),
            Self::Push => write!(f, "uploading merged data"),
        }
    }
}

/// Errors returned by a sync cycle.
///
/// Every variant except `AlreadyInProgress` and `RemoteUnavailable` means a
/// cycle started and aborted with no local change committed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A cycle is already running.
    #[error("sync already in progress")]
    AlreadyInProgress,

    /// The remote reported itself unavailable.
    #[error("remote data source unavailable")]
    RemoteUnavailable,

    /// Reading the local store failed.
    #[error("failed to read local data: {0}")]
    LocalRead(SourceError),

    /// A remote fetch failed.
    #[error("failed to fetch remote changes: {0}")]
    Fetch(SourceError),

    /// Remote conflict resolution failed.
    #[error("conflict resolution failed: {0}")]
    ConflictResolution(SourceError),

    /// The local transaction failed and was rolled back.
    #[error("failed to persist merged data: {0}")]
    Persistence(SourceError),

    /// A remote call exceeded the configured timeout.
    #[error("{phase} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Phase that timed out.
        phase: SyncPhase,
        /// Configured limit.
        after: Duration,
    },

    /// The cycle was cancelled while waiting on the remote.
    #[error("sync cancelled while {phase}")]
    Cancelled {
        /// Phase that was interrupted.
        phase: SyncPhase,
    },

    /// The background cycle task failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Phase in which the cycle failed, if it started.
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            Self::AlreadyInProgress | Self::RemoteUnavailable | Self::Internal(_) => None,
            Self::LocalRead(_) => Some(SyncPhase::LoadLocal),
            Self::Fetch(_) => Some(SyncPhase::Fetch),
            Self::ConflictResolution(_) => Some(SyncPhase::ResolveConflicts),
            Self::Persistence(_) => Some(SyncPhase::Persist),
            Self::Timeout { phase, .. } | Self::Cancelled { phase } => Some(*phase),
        }
    }

    /// Message suitable for showing to a user after a manual sync.
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyInProgress => "A sync is already running. Try again shortly.".into(),
            Self::RemoteUnavailable => {
                "The sync server can't be reached. Your changes are saved on this device.".into()
            }
            Self::Internal(_) => "Sync stopped unexpectedly. Your local data is unchanged.".into(),
            Self::Cancelled { phase } => {
                format!("Sync was cancelled while {phase}. Your local data is unchanged.")
            }
            Self::Timeout { phase, .. } => {
                format!("Sync timed out while {phase}. Your local data is unchanged.")
            }
            Self::LocalRead(_)
            | Self::Fetch(_)
            | Self::ConflictResolution(_)
            | Self::Persistence(_) => {
                let phase = self.phase().map(|p| p.to_string()).unwrap_or_default();
                format!("Sync failed while {phase}. Your local data is unchanged.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases() {
        assert_eq!(SyncError::AlreadyInProgress.phase(), None);
        assert_eq!(
            SyncError::Fetch(SourceError::Unavailable).phase(),
            Some(SyncPhase::Fetch)
        );
        assert_eq!(
            SyncError::Persistence(SourceError::NoTransaction).phase(),
            Some(SyncPhase::Persist)
        );
        assert_eq!(
            SyncError::Timeout {
                phase: SyncPhase::ResolveConflicts,
                after: Duration::from_secs(30),
            }
            .phase(),
            Some(SyncPhase::ResolveConflicts)
        );
    }

    #[test]
    fn user_message_names_the_phase() {
        let message = SyncError::Fetch(SourceError::Failed("503".into())).user_message();
        assert!(message.contains("fetching remote changes"));

        let message = SyncError::Persistence(SourceError::Failed("disk".into())).user_message();
        assert!(message.contains("saving merged data"));

        let message = SyncError::Cancelled {
            phase: SyncPhase::Fetch,
        }
        .user_message();
        assert!(message.contains("cancelled"));
    }

    #[test]
    fn display_includes_cause() {
        let error = SyncError::ConflictResolution(SourceError::Failed("boom".into()));
        assert_eq!(error.to_string(), "conflict resolution failed: boom");

        let error = SyncError::Timeout {
            phase: SyncPhase::Fetch,
            after: Duration::from_secs(30),
        };
        assert_eq!(error.to_string(), "fetching remote changes timed out after 30s");
    }
}
