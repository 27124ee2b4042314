//! Conflict model for a sync cycle.
//!
//! A [`SyncConflict`] pairs the local and remote copy of one entity whose
//! modification timestamps disagree. Conflicts are transient: they live for
//! one cycle and end up in the [`SyncResult`](crate::SyncResult), never in
//! storage. A [`SyncResolution`] is the value a [`ConflictStrategy`] chose.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{EntityKind, Project, SyncEntity, Task};

/// Divergence between the local and remote copy of the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncConflict {
    /// Conflicting task copies.
    Task {
        /// Local copy.
        local: Task,
        /// Remote copy.
        remote: Task,
    },
    /// Conflicting project copies.
    Project {
        /// Local copy.
        local: Project,
        /// Remote copy.
        remote: Project,
    },
}

impl SyncConflict {
    /// Kind of the conflicting entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Task { .. } => EntityKind::Task,
            Self::Project { .. } => EntityKind::Project,
        }
    }

    /// Identity shared by both copies.
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Task { local, .. } => local.entity_id(),
            Self::Project { local, .. } => local.entity_id(),
        }
    }

    /// Modification instant of the local copy.
    pub fn local_modified(&self) -> DateTime<Utc> {
        match self {
            Self::Task { local, .. } => local.modified_at,
            Self::Project { local, .. } => local.modified_at,
        }
    }

    /// Modification instant of the remote copy.
    pub fn remote_modified(&self) -> DateTime<Utc> {
        match self {
            Self::Task { remote, .. } => remote.modified_at,
            Self::Project { remote, .. } => remote.modified_at,
        }
    }
}

/// Policy used to settle a conflict.
///
/// Configured once per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The copy with the later `modified_at` wins.
    #[default]
    KeepNewest,
    /// The local copy always wins.
    KeepLocal,
    /// The remote copy always wins.
    KeepRemote,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepNewest => write!(f, "keep_newest"),
            Self::KeepLocal => write!(f, "keep_local"),
            Self::KeepRemote => write!(f, "keep_remote"),
        }
    }
}

/// Outcome of resolving one conflict: the entity value to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncResolution {
    /// Winning task value.
    Task(Task),
    /// Winning project value.
    Project(Project),
}

impl SyncResolution {
    /// Kind of the resolved entity.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Task(_) => EntityKind::Task,
            Self::Project(_) => EntityKind::Project,
        }
    }

    /// Identity of the resolved entity.
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Task(task) => task.entity_id(),
            Self::Project(project) => project.entity_id(),
        }
    }

    /// Resolved task, if this is a task resolution.
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(task) => Some(task),
            Self::Project(_) => None,
        }
    }

    /// Resolved project, if this is a project resolution.
    pub fn as_project(&self) -> Option<&Project> {
        match self {
            Self::Project(project) => Some(project),
            Self::Task(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn conflict_accessors() {
        let local = Task::new("Local", at(10)).unwrap();
        let mut remote = local.clone();
        remote.rename("Remote", at(20)).unwrap();

        let conflict = SyncConflict::Task {
            local: local.clone(),
            remote,
        };
        assert_eq!(conflict.kind(), EntityKind::Task);
        assert_eq!(conflict.entity_id(), *local.id.as_uuid());
        assert_eq!(conflict.local_modified(), at(10));
        assert_eq!(conflict.remote_modified(), at(20));
    }

    #[test]
    fn strategy_defaults_to_keep_newest() {
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::KeepNewest);
    }

    #[test]
    fn strategy_serde_names() {
        let json = serde_json::to_string(&ConflictStrategy::KeepRemote).unwrap();
        assert_eq!(json, "\"keep_remote\"");
        let parsed: ConflictStrategy = serde_json::from_str("\"keep_local\"").unwrap();
        assert_eq!(parsed, ConflictStrategy::KeepLocal);
    }

    #[test]
    fn resolution_accessors() {
        let project = Project::new("Garden", at(0)).unwrap();
        let resolution = SyncResolution::Project(project.clone());
        assert_eq!(resolution.kind(), EntityKind::Project);
        assert_eq!(resolution.entity_id(), *project.id.as_uuid());
        assert!(resolution.as_task().is_none());
        assert_eq!(resolution.as_project(), Some(&project));
    }
}
