//! Summary of one sync cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{EntityKind, SyncConflict};

/// Summary of one completed sync cycle.
///
/// Built fresh per cycle, returned to the caller and broadcast as an
/// event. Counts come from explicit identity sets tracked during the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Tasks that arrived from the remote and were new locally.
    pub tasks_added: usize,
    /// Tasks whose conflict was resolved during the merge.
    pub tasks_updated: usize,
    /// Tasks removed locally by the merge.
    pub tasks_deleted: usize,
    /// Projects that arrived from the remote and were new locally.
    pub projects_added: usize,
    /// Projects whose conflict was resolved during the merge.
    pub projects_updated: usize,
    /// Projects removed locally by the merge.
    pub projects_deleted: usize,
    /// Every conflict detected in this cycle.
    pub conflicts: Vec<SyncConflict>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// The push of merged state failed and was queued for retry.
    #[serde(default)]
    pub push_deferred: bool,
}

impl SyncResult {
    /// An empty result completed at `completed_at`.
    pub fn empty(completed_at: DateTime<Utc>) -> Self {
        Self {
            tasks_added: 0,
            tasks_updated: 0,
            tasks_deleted: 0,
            projects_added: 0,
            projects_updated: 0,
            projects_deleted: 0,
            conflicts: Vec::new(),
            completed_at,
            push_deferred: false,
        }
    }

    /// Sum of all added, updated and deleted counts.
    pub fn total_changes(&self) -> usize {
        self.tasks_added
            + self.tasks_updated
            + self.tasks_deleted
            + self.projects_added
            + self.projects_updated
            + self.projects_deleted
    }

    /// Number of conflicts of the given kind.
    pub fn conflict_count(&self, kind: EntityKind) -> usize {
        self.conflicts.iter().filter(|c| c.kind() == kind).count()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tasks +{} ~{} -{}, projects +{} ~{} -{}, {} conflict(s)",
            self.tasks_added,
            self.tasks_updated,
            self.tasks_deleted,
            self.projects_added,
            self.projects_updated,
            self.projects_deleted,
            self.conflicts.len()
        )?;
        if self.push_deferred {
            write!(f, ", push deferred")?;
        }
        Ok(())
    }
}
