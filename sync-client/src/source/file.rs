//! JSON file data sources.
//!
//! The local store is a single JSON document. A transaction stages a copy
//! of the document in memory; commit writes a temp file next to the
//! document and renames it over the original, so readers see either the
//! old document or the new one.
//!
//! Before the rename, commit re-reads the document's revision. If another
//! process committed since the transaction began, the commit fails with
//! [`SourceError::StaleWrite`].
//!
//! The remote is a JSON document inside a shared directory (a mounted
//! share or a synced folder). It is unavailable while that directory is
//! missing. Change marks come from the clock of the device that pushes.

use super::{LocalDataSource, RemoteDataSource, RemoteSnapshot, SourceError, StoreSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasksync_core::{resolve_all, Clock, SystemClock};
use tasksync_types::{ConflictStrategy, Project, SyncConflict, SyncResolution, Task};

/// File name of the remote document inside the shared directory.
pub const REMOTE_FILE_NAME: &str = "tasksync-remote.json";

/// Read a document; a missing file is an empty store.
async fn read_snapshot<T: DeserializeOwned + Default>(path: &Path) -> Result<T, SourceError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| SourceError::Malformed {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(SourceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write a document via temp file and rename.
async fn write_snapshot<T: Serialize>(path: &Path, snapshot: &T) -> Result<(), SourceError> {
    let bytes = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| SourceError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

/// Local store kept in one JSON file.
#[derive(Debug)]
pub struct JsonFileLocalSource {
    path: PathBuf,
    staged: Mutex<Option<StoreSnapshot>>,
}

impl JsonFileLocalSource {
    /// Open the store at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staged: Mutex::new(None),
        }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an empty document unless one already exists.
    pub async fn initialize(&self) -> Result<(), SourceError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        write_snapshot(&self.path, &StoreSnapshot::default()).await
    }

    /// Apply `update` to the staged copy, or read-modify-write the file
    /// when no transaction is open.
    async fn write_with(&self, update: impl FnOnce(&mut StoreSnapshot)) -> Result<(), SourceError> {
        {
            let mut staged = self.staged.lock();
            if let Some(snapshot) = staged.as_mut() {
                update(snapshot);
                return Ok(());
            }
        }
        let mut snapshot: StoreSnapshot = read_snapshot(&self.path).await?;
        update(&mut snapshot);
        snapshot.revision += 1;
        write_snapshot(&self.path, &snapshot).await
    }

    async fn read(&self) -> Result<StoreSnapshot, SourceError> {
        read_snapshot(&self.path).await
    }
}

#[async_trait]
impl LocalDataSource for JsonFileLocalSource {
    async fn load_tasks(&self) -> Result<Vec<Task>, SourceError> {
        Ok(self.read().await?.tasks)
    }

    async fn load_projects(&self) -> Result<Vec<Project>, SourceError> {
        Ok(self.read().await?.projects)
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<(), SourceError> {
        self.write_with(|s| s.tasks = tasks.to_vec()).await
    }

    async fn save_projects(&self, projects: &[Project]) -> Result<(), SourceError> {
        self.write_with(|s| s.projects = projects.to_vec()).await
    }

    async fn begin_transaction(&self) -> Result<(), SourceError> {
        if self.staged.lock().is_some() {
            return Err(SourceError::TransactionInProgress);
        }
        let snapshot = self.read().await?;
        let mut staged = self.staged.lock();
        if staged.is_some() {
            return Err(SourceError::TransactionInProgress);
        }
        *staged = Some(snapshot);
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), SourceError> {
        let mut snapshot = self
            .staged
            .lock()
            .clone()
            .ok_or(SourceError::NoTransaction)?;
        let actual = self.read().await?.revision;
        if actual != snapshot.revision {
            return Err(SourceError::StaleWrite {
                expected: snapshot.revision,
                actual,
            });
        }
        snapshot.revision += 1;
        write_snapshot(&self.path, &snapshot).await?;
        *self.staged.lock() = None;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), SourceError> {
        self.staged
            .lock()
            .take()
            .map(|_| ())
            .ok_or(SourceError::NoTransaction)
    }

    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self.read().await?.last_sync)
    }

    async fn set_last_sync_timestamp(&self, at: DateTime<Utc>) -> Result<(), SourceError> {
        self.write_with(|s| s.last_sync = Some(at)).await
    }

    async fn revision(&self) -> Result<u64, SourceError> {
        Ok(self.read().await?.revision)
    }
}

/// Remote kept as a JSON document in a shared directory.
#[derive(Debug, Clone)]
pub struct JsonFileRemoteSource {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl JsonFileRemoteSource {
    /// Use `dir` as the shared directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    /// Use `dir` as the shared directory, stamping changes with `clock`.
    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    /// Path of the remote document.
    pub fn document_path(&self) -> PathBuf {
        self.dir.join(REMOTE_FILE_NAME)
    }

    async fn read(&self) -> Result<RemoteSnapshot, SourceError> {
        if !self.is_available().await {
            return Err(SourceError::Unavailable);
        }
        read_snapshot(&self.document_path()).await
    }

    async fn update(
        &self,
        apply: impl FnOnce(&mut RemoteSnapshot, DateTime<Utc>),
    ) -> Result<(), SourceError> {
        let mut snapshot = self.read().await?;
        apply(&mut snapshot, self.clock.now());
        write_snapshot(&self.document_path(), &snapshot).await
    }
}

#[async_trait]
impl RemoteDataSource for JsonFileRemoteSource {
    async fn is_available(&self) -> bool {
        tokio::fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn change_mark(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self.read().await?.change_mark)
    }

    async fn fetch_tasks(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Task>, SourceError> {
        Ok(self.read().await?.tasks_since(since))
    }

    async fn fetch_projects(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Project>, SourceError> {
        Ok(self.read().await?.projects_since(since))
    }

    async fn push_tasks(&self, tasks: &[Task]) -> Result<(), SourceError> {
        self.update(|s, now| s.upsert_tasks(tasks, now)).await
    }

    async fn push_projects(&self, projects: &[Project]) -> Result<(), SourceError> {
        self.update(|s, now| s.upsert_projects(projects, now)).await
    }

    async fn resolve_conflicts(
        &self,
        conflicts: &[SyncConflict],
        strategy: ConflictStrategy,
    ) -> Result<Vec<SyncResolution>, SourceError> {
        Ok(resolve_all(conflicts, strategy))
    }
}
