//! Task and project convenience keys.
//!
//! Tasks are cached per calendar day and per project; projects are cached
//! as one collection. Lists that change more often get shorter TTLs.

use crate::{Expiration, TypedCache};
use chrono::NaiveDate;
use std::time::Duration;
use tasksync_types::{Project, Task};

/// Key holding the full project list.
pub const PROJECTS_KEY: &str = "all_projects";

/// Key for the tasks due on `date`.
pub fn tasks_for_date_key(date: NaiveDate) -> String {
    format!("tasks_{}", date.format("%Y-%m-%d"))
}

/// Key for the tasks of `project`, case-insensitive.
pub fn tasks_for_project_key(project: &str) -> String {
    format!("project_tasks_{}", project.to_lowercase())
}

/// TTL tiers for the convenience keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Per-day task lists.
    pub day_tasks: Duration,
    /// Per-project task lists.
    pub project_tasks: Duration,
    /// The project list.
    pub projects: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            day_tasks: Duration::from_secs(15 * 60),
            project_tasks: Duration::from_secs(10 * 60),
            projects: Duration::from_secs(30 * 60),
        }
    }
}

/// Task/project helpers for any typed cache.
pub trait TaskCacheExt: TypedCache {
    /// Cache the tasks due on `date`.
    fn cache_tasks_for_date(&self, date: NaiveDate, tasks: &[Task], ttls: &CacheTtls) {
        self.set(
            &tasks_for_date_key(date),
            tasks,
            Expiration::after(ttls.day_tasks),
        );
    }

    /// Cached tasks due on `date`.
    fn cached_tasks_for_date(&self, date: NaiveDate) -> Option<Vec<Task>> {
        self.get(&tasks_for_date_key(date))
    }

    /// Drop the cached tasks due on `date`.
    fn invalidate_tasks_for_date(&self, date: NaiveDate) {
        self.remove(&tasks_for_date_key(date));
    }

    /// Cache the tasks of `project`.
    fn cache_tasks_for_project(&self, project: &str, tasks: &[Task], ttls: &CacheTtls) {
        self.set(
            &tasks_for_project_key(project),
            tasks,
            Expiration::after(ttls.project_tasks),
        );
    }

    /// Cached tasks of `project`.
    fn cached_tasks_for_project(&self, project: &str) -> Option<Vec<Task>> {
        self.get(&tasks_for_project_key(project))
    }

    /// Drop the cached tasks of `project`.
    fn invalidate_tasks_for_project(&self, project: &str) {
        self.remove(&tasks_for_project_key(project));
    }

    /// Cache the project list.
    fn cache_projects(&self, projects: &[Project], ttls: &CacheTtls) {
        self.set(PROJECTS_KEY, projects, Expiration::after(ttls.projects));
    }

    /// Cached project list.
    fn cached_projects(&self) -> Option<Vec<Project>> {
        self.get(PROJECTS_KEY)
    }

    /// Drop the cached project list.
    fn invalidate_projects(&self) {
        self.remove(PROJECTS_KEY);
    }
}

impl<C: TypedCache + ?Sized> TaskCacheExt for C {}
