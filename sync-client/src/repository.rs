//! Cache-aside reads and invalidating writes over the local store.
//!
//! Reads check the cache first and fill it on a miss. Writes go through a
//! local transaction and then drop every cached list the change could
//! affect, so the next read sees the new state.
//!
//! An upsert is computed from a loaded collection and committed against
//! that collection's revision. If another writer got in between, the
//! upsert is recomputed on the newer state.

use crate::source::{write_atomically, LocalDataSource, LocalWrite, SourceError};
use chrono::NaiveDate;
use std::sync::Arc;
use tasksync_cache::{Cache, CacheTtls, TaskCacheExt};
use tasksync_types::{Project, Task};

/// Upsert attempts before a stale write is reported.
const WRITE_ATTEMPTS: u32 = 3;

/// Local store fronted by the TTL cache.
pub struct CachedRepository<L> {
    local: Arc<L>,
    cache: Arc<dyn Cache>,
    ttls: CacheTtls,
}

impl<L: LocalDataSource> CachedRepository<L> {
    /// Create a repository over `local`, caching with `ttls`.
    pub fn new(local: Arc<L>, cache: Arc<dyn Cache>, ttls: CacheTtls) -> Self {
        Self { local, cache, ttls }
    }

    /// All tasks, uncached.
    pub async fn tasks(&self) -> Result<Vec<Task>, SourceError> {
        self.local.load_tasks().await
    }

    /// Tasks due on `date` (UTC).
    pub async fn tasks_for_date(&self, date: NaiveDate) -> Result<Vec<Task>, SourceError> {
        if let Some(tasks) = self.cache.cached_tasks_for_date(date) {
            return Ok(tasks);
        }
        let tasks: Vec<Task> = self
            .local
            .load_tasks()
            .await?
            .into_iter()
            .filter(|t| t.due_date.is_some_and(|due| due.date_naive() == date))
            .collect();
        self.cache.cache_tasks_for_date(date, &tasks, &self.ttls);
        Ok(tasks)
    }

    /// Tasks in `project` (case-insensitive).
    pub async fn tasks_for_project(&self, project: &str) -> Result<Vec<Task>, SourceError> {
        if let Some(tasks) = self.cache.cached_tasks_for_project(project) {
            return Ok(tasks);
        }
        let tasks: Vec<Task> = self
            .local
            .load_tasks()
            .await?
            .into_iter()
            .filter(|t| t.belongs_to(project))
            .collect();
        self.cache.cache_tasks_for_project(project, &tasks, &self.ttls);
        Ok(tasks)
    }

    /// All projects.
    pub async fn projects(&self) -> Result<Vec<Project>, SourceError> {
        if let Some(projects) = self.cache.cached_projects() {
            return Ok(projects);
        }
        let projects = self.local.load_projects().await?;
        self.cache.cache_projects(&projects, &self.ttls);
        Ok(projects)
    }

    /// Insert or replace a task by id.
    pub async fn save_task(&self, task: Task) -> Result<(), SourceError> {
        let mut attempt = 1;
        let previous = loop {
            match self.try_save_task(&task).await {
                Err(SourceError::StaleWrite { .. }) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, "Store changed during save, retrying");
                    attempt += 1;
                }
                outcome => break outcome?,
            }
        };

        // The old due date and project lists are stale too.
        for affected in previous.iter().chain(std::iter::once(&task)) {
            self.invalidate_task(affected);
        }
        Ok(())
    }

    /// Insert or replace a project by id.
    pub async fn save_project(&self, project: Project) -> Result<(), SourceError> {
        let mut attempt = 1;
        loop {
            match self.try_save_project(&project).await {
                Err(SourceError::StaleWrite { .. }) if attempt < WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, "Store changed during save, retrying");
                    attempt += 1;
                }
                outcome => break outcome?,
            }
        }

        self.cache.invalidate_projects();
        Ok(())
    }

    /// One upsert attempt. Returns the task it replaced.
    async fn try_save_task(&self, task: &Task) -> Result<Option<Task>, SourceError> {
        let revision = self.local.revision().await?;
        let mut tasks = self.local.load_tasks().await?;
        let previous = match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => Some(std::mem::replace(slot, task.clone())),
            None => {
                tasks.push(task.clone());
                None
            }
        };

        write_atomically(
            self.local.as_ref(),
            LocalWrite {
                tasks: Some(&tasks),
                based_on: Some(revision),
                ..LocalWrite::default()
            },
        )
        .await?;
        Ok(previous)
    }

    async fn try_save_project(&self, project: &Project) -> Result<(), SourceError> {
        let revision = self.local.revision().await?;
        let mut projects = self.local.load_projects().await?;
        match projects.iter_mut().find(|p| p.id == project.id) {
            Some(slot) => *slot = project.clone(),
            None => projects.push(project.clone()),
        }

        write_atomically(
            self.local.as_ref(),
            LocalWrite {
                projects: Some(&projects),
                based_on: Some(revision),
                ..LocalWrite::default()
            },
        )
        .await
    }

    fn invalidate_task(&self, task: &Task) {
        if let Some(due) = task.due_date {
            self.cache.invalidate_tasks_for_date(due.date_naive());
        }
        self.cache.invalidate_tasks_for_project(&task.project);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryLocalSource;
    use chrono::{DateTime, TimeZone, Utc};
    use tasksync_cache::MemoryCache;
    use tasksync_core::ManualClock;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn day() -> NaiveDate {
        at(0).date_naive()
    }

    fn repository() -> (CachedRepository<MemoryLocalSource>, MemoryLocalSource, Arc<MemoryCache>) {
        let local = MemoryLocalSource::new();
        let cache = Arc::new(MemoryCache::with_clock(Arc::new(ManualClock::new(at(0)))));
        let repository =
            CachedRepository::new(Arc::new(local.clone()), cache.clone(), CacheTtls::default());
        (repository, local, cache)
    }

    #[tokio::test]
    async fn day_list_is_served_from_cache() {
        let (repository, local, cache) = repository();
        let due = Task::new("Standup", at(0)).unwrap().due(at(60));
        local.seed(vec![due.clone(), Task::new("Someday", at(0)).unwrap()], vec![]);

        assert_eq!(repository.tasks_for_date(day()).await.unwrap(), vec![due.clone()]);

        // A write that bypasses the repository is not seen until invalidation.
        local.seed(vec![], vec![]);
        assert_eq!(repository.tasks_for_date(day()).await.unwrap(), vec![due]);
        assert_eq!(cache.statistics().hits, 1);
    }

    #[tokio::test]
    async fn save_task_invalidates_old_and_new_lists() {
        let (repository, local, cache) = repository();
        let mut task = Task::new("Plan", at(0))
            .unwrap()
            .in_project("Work")
            .due(at(60));
        local.seed(vec![task.clone()], vec![]);
        repository.tasks_for_date(day()).await.unwrap();
        repository.tasks_for_project("Work").await.unwrap();
        assert_eq!(cache.item_count(), 2);

        task.move_to_project("Home", at(10));
        task.set_due_date(None, at(10));
        repository.save_task(task.clone()).await.unwrap();

        assert_eq!(cache.item_count(), 0);
        assert!(repository.tasks_for_date(day()).await.unwrap().is_empty());
        assert!(repository.tasks_for_project("work").await.unwrap().is_empty());
        assert_eq!(repository.tasks_for_project("home").await.unwrap(), vec![task]);
        assert_eq!(local.commit_count(), 1);
    }

    #[tokio::test]
    async fn save_task_appends_new_tasks() {
        let (repository, local, _cache) = repository();
        let first = Task::new("first", at(0)).unwrap();
        let second = Task::new("second", at(1)).unwrap();

        repository.save_task(first.clone()).await.unwrap();
        repository.save_task(second.clone()).await.unwrap();

        assert_eq!(local.snapshot().tasks, vec![first, second]);
    }

    #[tokio::test]
    async fn save_project_invalidates_project_list() {
        let (repository, _local, _cache) = repository();
        assert!(repository.projects().await.unwrap().is_empty());

        let project = Project::new("Garden", at(0)).unwrap();
        repository.save_project(project.clone()).await.unwrap();

        assert_eq!(repository.projects().await.unwrap(), vec![project]);
    }

    #[tokio::test]
    async fn failed_save_keeps_cache() {
        let (repository, local, cache) = repository();
        repository.projects().await.unwrap();
        local.fail_next_save_projects("read-only");

        let result = repository
            .save_project(Project::new("Garden", at(0)).unwrap())
            .await;

        assert!(result.is_err());
        assert_eq!(cache.item_count(), 1);
        assert!(local.snapshot().projects.is_empty());
    }

    #[tokio::test]
    async fn save_task_keeps_a_concurrent_write() {
        let (repository, local, _cache) = repository();
        let theirs = Task::new("theirs", at(0)).unwrap();
        let ours = Task::new("ours", at(1)).unwrap();
        local.write_before_next_commit(theirs.clone());

        repository.save_task(ours.clone()).await.unwrap();

        assert_eq!(local.snapshot().tasks, vec![theirs, ours]);
        assert_eq!(local.rollback_count(), 1);
        assert_eq!(local.commit_count(), 1);
    }
}
