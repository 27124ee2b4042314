//! Data source abstraction for tasksync.
//!
//! The coordinator never owns task or project storage. It talks to two
//! collaborators:
//! - [`LocalDataSource`] - the on-device store, authoritative for reads
//!   and writes, with explicit transactions
//! - [`RemoteDataSource`] - the shared store other devices sync against
//!
//! # Transactions
//!
//! Inside a transaction, `save_*` and `set_last_sync_timestamp` are staged
//! and become visible only on `commit_transaction`. `rollback_transaction`
//! discards them. Loads always read committed state. Outside a
//! transaction, writes apply immediately.
//!
//! Every commit bumps the store's revision. A commit whose transaction
//! began at an older revision than the store now has fails with
//! [`SourceError::StaleWrite`] instead of overwriting the newer state.
//!
//! # Change marks
//!
//! The remote stamps every entity it receives with a change mark: an
//! instant that only moves forward, assigned by the remote when the
//! content changes. `fetch_*(since)` filters on that mark, never on the
//! entity's own `modified_at`, so an edit made offline long ago is still
//! delivered once it reaches the remote.

mod file;
mod memory;

pub use file::{JsonFileLocalSource, JsonFileRemoteSource, REMOTE_FILE_NAME};
pub use memory::{MemoryLocalSource, MockRemoteSource};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tasksync_types::{ConflictStrategy, Project, SyncConflict, SyncResolution, Task};
use thiserror::Error;

/// Data source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source cannot be reached.
    #[error("data source unavailable")]
    Unavailable,

    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A stored document could not be parsed.
    #[error("malformed document {path}: {source}")]
    Malformed {
        /// File involved.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// The store changed after the write's basis was read.
    #[error("store changed during the write (revision {expected}, now {actual})")]
    StaleWrite {
        /// Revision the write was based on.
        expected: u64,
        /// Revision the store has now.
        actual: u64,
    },

    /// A value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Commit or rollback without a transaction.
    #[error("no transaction in progress")]
    NoTransaction,

    /// Begin while another transaction is open.
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    /// The operation failed for a source-specific reason.
    #[error("{0}")]
    Failed(String),
}

/// On-device store.
#[async_trait]
pub trait LocalDataSource: Send + Sync {
    /// Load every committed task.
    async fn load_tasks(&self) -> Result<Vec<Task>, SourceError>;

    /// Load every committed project.
    async fn load_projects(&self) -> Result<Vec<Project>, SourceError>;

    /// Replace the task collection.
    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), SourceError>;

    /// Replace the project collection.
    async fn save_projects(&self, projects: &[Project]) -> Result<(), SourceError>;

    /// Open a transaction.
    async fn begin_transaction(&self) -> Result<(), SourceError>;

    /// Publish everything staged since `begin_transaction`.
    async fn commit_transaction(&self) -> Result<(), SourceError>;

    /// Discard everything staged since `begin_transaction`.
    async fn rollback_transaction(&self) -> Result<(), SourceError>;

    /// Instant of the last successful sync, if any.
    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, SourceError>;

    /// Record the instant of a successful sync.
    async fn set_last_sync_timestamp(&self, at: DateTime<Utc>) -> Result<(), SourceError>;

    /// Revision of the committed state; every commit increases it.
    async fn revision(&self) -> Result<u64, SourceError>;
}

/// Shared remote store.
#[async_trait]
pub trait RemoteDataSource: Send + Sync {
    /// Whether the remote can be reached right now.
    async fn is_available(&self) -> bool;

    /// Highest change mark the remote has assigned, `None` while it has
    /// never received anything.
    async fn change_mark(&self) -> Result<Option<DateTime<Utc>>, SourceError>;

    /// Tasks whose change mark is after `since` (everything when `None`).
    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, SourceError>;

    /// Projects whose change mark is after `since` (everything when `None`).
    async fn fetch_projects(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Project>, SourceError>;

    /// Insert or replace each task by id. Tasks the remote holds that are
    /// not in `tasks` are kept.
    async fn push_tasks(&self, tasks: &[Task]) -> Result<(), SourceError>;

    /// Insert or replace each project by id.
    async fn push_projects(&self, projects: &[Project]) -> Result<(), SourceError>;

    /// Resolve each conflict with `strategy`, one resolution per conflict.
    async fn resolve_conflicts(
        &self,
        conflicts: &[SyncConflict],
        strategy: ConflictStrategy,
    ) -> Result<Vec<SyncResolution>, SourceError>;
}

/// Full contents of a local store, as kept on disk or in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Task collection.
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Project collection.
    #[serde(default)]
    pub projects: Vec<Project>,
    /// Remote change mark seen by the last successful sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Bumped by every commit.
    #[serde(default)]
    pub revision: u64,
}

/// An entity as held by the remote, with the mark it was received under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamped<E> {
    /// The entity.
    pub entity: E,
    /// Change mark assigned when this content reached the remote.
    pub changed_at: DateTime<Utc>,
}

/// Full contents of a remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Task collection.
    #[serde(default)]
    pub tasks: Vec<Stamped<Task>>,
    /// Project collection.
    #[serde(default)]
    pub projects: Vec<Stamped<Project>>,
    /// Highest change mark assigned so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_mark: Option<DateTime<Utc>>,
}

impl RemoteSnapshot {
    /// Tasks stamped strictly after `since`.
    pub fn tasks_since(&self, since: Option<DateTime<Utc>>) -> Vec<Task> {
        changed_since(&self.tasks, since)
    }

    /// Projects stamped strictly after `since`.
    pub fn projects_since(&self, since: Option<DateTime<Utc>>) -> Vec<Project> {
        changed_since(&self.projects, since)
    }

    /// Upsert `tasks`, stamping the ones whose content changed.
    pub fn upsert_tasks(&mut self, tasks: &[Task], now: DateTime<Utc>) {
        let mark = &mut self.change_mark;
        upsert(&mut self.tasks, tasks, |t| t.id, || next_mark(mark, now));
    }

    /// Upsert `projects`, stamping the ones whose content changed.
    pub fn upsert_projects(&mut self, projects: &[Project], now: DateTime<Utc>) {
        let mark = &mut self.change_mark;
        upsert(&mut self.projects, projects, |p| p.id, || next_mark(mark, now));
    }

    /// Entities without their marks.
    pub fn entities(&self) -> (Vec<Task>, Vec<Project>) {
        (
            self.tasks.iter().map(|s| s.entity.clone()).collect(),
            self.projects.iter().map(|s| s.entity.clone()).collect(),
        )
    }
}

/// Advance the change mark past its previous value, even if the clock of
/// whoever writes the remote is behind.
fn next_mark(mark: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = match *mark {
        Some(previous) if previous >= now => previous + chrono::Duration::microseconds(1),
        _ => now,
    };
    *mark = Some(next);
    next
}

fn upsert<E, K>(
    stored: &mut Vec<Stamped<E>>,
    incoming: &[E],
    key: impl Fn(&E) -> K,
    mut stamp: impl FnMut() -> DateTime<Utc>,
) where
    E: Clone + PartialEq,
    K: PartialEq,
{
    // One mark per push, taken on the first real change.
    let mut mark = None;
    for entity in incoming {
        let id = key(entity);
        match stored.iter_mut().find(|s| key(&s.entity) == id) {
            Some(slot) if slot.entity == *entity => {}
            Some(slot) => {
                slot.entity = entity.clone();
                slot.changed_at = *mark.get_or_insert_with(&mut stamp);
            }
            None => stored.push(Stamped {
                entity: entity.clone(),
                changed_at: *mark.get_or_insert_with(&mut stamp),
            }),
        }
    }
}

fn changed_since<E: Clone>(stored: &[Stamped<E>], since: Option<DateTime<Utc>>) -> Vec<E> {
    stored
        .iter()
        .filter(|s| match since {
            Some(since) => s.changed_at > since,
            None => true,
        })
        .map(|s| s.entity.clone())
        .collect()
}

/// Writes applied to a local store in one transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWrite<'a> {
    /// New task collection.
    pub tasks: Option<&'a [Task]>,
    /// New project collection.
    pub projects: Option<&'a [Project]>,
    /// New last-sync instant.
    pub synced_at: Option<DateTime<Utc>>,
    /// Revision the write was computed from. The write fails with
    /// [`SourceError::StaleWrite`] if the store has moved past it.
    pub based_on: Option<u64>,
}

/// Apply `write` inside a transaction.
///
/// Any failure after `begin_transaction` rolls back before the error is
/// returned, so either every part of the write is committed or none is.
pub async fn write_atomically<L>(local: &L, write: LocalWrite<'_>) -> Result<(), SourceError>
where
    L: LocalDataSource + ?Sized,
{
    local.begin_transaction().await?;

    let staged = async {
        if let Some(expected) = write.based_on {
            let actual = local.revision().await?;
            if actual != expected {
                return Err(SourceError::StaleWrite { expected, actual });
            }
        }
        if let Some(tasks) = write.tasks {
            local.save_tasks(tasks).await?;
        }
        if let Some(projects) = write.projects {
            local.save_projects(projects).await?;
        }
        if let Some(at) = write.synced_at {
            local.set_last_sync_timestamp(at).await?;
        }
        local.commit_transaction().await
    };

    if let Err(e) = staged.await {
        if let Err(rollback) = local.rollback_transaction().await {
            tracing::error!("Rollback after failed write also failed: {}", rollback);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn remote_filters_by_change_mark_not_modification() {
        let mut remote = RemoteSnapshot::default();
        // Edited long ago, received late.
        let offline_edit = Task::new("offline", at(10)).unwrap();
        let fresh = Task::new("fresh", at(90)).unwrap();
        remote.upsert_tasks(&[fresh.clone()], at(50));
        remote.upsert_tasks(&[offline_edit.clone()], at(100));

        assert_eq!(remote.change_mark, Some(at(100)));
        assert_eq!(remote.tasks_since(None).len(), 2);
        assert_eq!(remote.tasks_since(Some(at(50))), vec![offline_edit]);
        // Strictly after: content stamped exactly at `since` was already seen.
        assert!(remote.tasks_since(Some(at(100))).is_empty());
    }

    #[test]
    fn upsert_keeps_unpushed_entities_and_stamps_only_changes() {
        let mut remote = RemoteSnapshot::default();
        let kept = Task::new("kept", at(0)).unwrap();
        let mut edited = Task::new("edited", at(0)).unwrap();
        remote.upsert_tasks(&[kept.clone(), edited.clone()], at(10));

        edited.rename("edited again", at(20)).unwrap();
        remote.upsert_tasks(&[edited.clone()], at(30));

        assert_eq!(remote.entities().0, vec![kept.clone(), edited.clone()]);
        assert_eq!(remote.tasks_since(Some(at(10))), vec![edited.clone()]);

        // Pushing identical content assigns no new mark.
        remote.upsert_tasks(&[kept, edited], at(40));
        assert_eq!(remote.change_mark, Some(at(30)));
    }

    #[test]
    fn change_mark_moves_forward_when_clock_is_behind() {
        let mut remote = RemoteSnapshot::default();
        remote.upsert_projects(&[Project::new("a", at(0)).unwrap()], at(100));
        remote.upsert_projects(&[Project::new("b", at(0)).unwrap()], at(50));

        let second = remote.change_mark.unwrap();
        assert!(second > at(100));
        assert_eq!(remote.projects_since(Some(at(100))).len(), 1);
    }

    #[test]
    fn empty_document_parses() {
        let snapshot: StoreSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, StoreSnapshot::default());
    }

    #[tokio::test]
    async fn write_atomically_commits_all_parts() {
        let local = MemoryLocalSource::new();
        let tasks = vec![Task::new("a", at(0)).unwrap()];
        let projects = vec![Project::new("p", at(0)).unwrap()];

        write_atomically(
            &local,
            LocalWrite {
                tasks: Some(&tasks),
                projects: Some(&projects),
                synced_at: Some(at(5)),
                based_on: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(local.load_tasks().await.unwrap(), tasks);
        assert_eq!(local.load_projects().await.unwrap(), projects);
        assert_eq!(local.last_sync_timestamp().await.unwrap(), Some(at(5)));
        assert_eq!(local.commit_count(), 1);
    }

    #[tokio::test]
    async fn write_atomically_rolls_back_on_failure() {
        let local = MemoryLocalSource::new();
        let before = vec![Task::new("before", at(0)).unwrap()];
        local.seed(before.clone(), vec![]);
        local.fail_next_save_projects("disk full");

        let tasks = vec![Task::new("after", at(1)).unwrap()];
        let projects = vec![Project::new("p", at(1)).unwrap()];
        let result = write_atomically(
            &local,
            LocalWrite {
                tasks: Some(&tasks),
                projects: Some(&projects),
                synced_at: Some(at(5)),
                based_on: None,
            },
        )
        .await;

        assert!(matches!(result, Err(SourceError::Failed(_))));
        assert_eq!(local.load_tasks().await.unwrap(), before);
        assert!(local.load_projects().await.unwrap().is_empty());
        assert_eq!(local.last_sync_timestamp().await.unwrap(), None);
        assert_eq!(local.rollback_count(), 1);
        assert!(!local.in_transaction());
    }

    #[tokio::test]
    async fn write_based_on_old_revision_is_refused() {
        let local = MemoryLocalSource::new();
        let basis = local.revision().await.unwrap();
        // Another writer commits in between.
        let theirs = vec![Task::new("theirs", at(0)).unwrap()];
        local.save_tasks(&theirs).await.unwrap();

        let ours = vec![Task::new("ours", at(1)).unwrap()];
        let result = write_atomically(
            &local,
            LocalWrite {
                tasks: Some(&ours),
                based_on: Some(basis),
                ..LocalWrite::default()
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(SourceError::StaleWrite { expected: 0, actual: 1 })
        ));
        assert_eq!(local.load_tasks().await.unwrap(), theirs);
        assert_eq!(local.rollback_count(), 1);
    }
}
