//! Task and project entities.
//!
//! Both entities carry an immutable identity and a `modified_at` timestamp.
//! `modified_at` is the only freshness signal the sync engine uses for
//! conflict detection, so every mutator bumps it and it never moves
//! backwards, even if the wall clock does.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ProjectId, SyncConflict, SyncResolution, TaskId, ValidationError};

/// Maximum length of a task or project name, in characters.
pub const MAX_NAME_LEN: usize = 256;

/// Project that tasks land in when none is given.
pub const DEFAULT_PROJECT: &str = "Inbox";

/// Kind of a synchronized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A [`Task`].
    Task,
    /// A [`Project`].
    Project,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Common view over entities that take part in a sync cycle.
pub trait SyncEntity: Clone {
    /// Entity kind.
    const KIND: EntityKind;

    /// Identity, stable across devices.
    fn entity_id(&self) -> Uuid;

    /// Last modification instant.
    fn modified_at(&self) -> DateTime<Utc>;

    /// Pair a local and a remote copy into a conflict.
    fn conflict(local: Self, remote: Self) -> SyncConflict;

    /// Wrap the winning copy as a resolution.
    fn into_resolution(self) -> SyncResolution;

    /// Extract this kind of entity from a resolution.
    fn from_resolution(resolution: &SyncResolution) -> Option<&Self>;
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Medium priority (default).
    #[default]
    Medium,
    /// High priority.
    High,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ValidationError::UnknownPriority(other.to_string())),
        }
    }
}

/// A to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identity.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Optional free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Name of the project this task belongs to.
    pub project: String,
    /// When the task is scheduled for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Completion state.
    #[serde(default)]
    pub is_complete: bool,
    /// When the task was completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_completed: Option<DateTime<Utc>>,
    /// When the task was created.
    pub date_added: DateTime<Utc>,
    /// Last modification instant.
    pub modified_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task in the default project.
    pub fn new(name: &str, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        validate_name(name)?;
        Ok(Self {
            id: TaskId::new(),
            name: name.trim().to_string(),
            details: None,
            priority: TaskPriority::default(),
            project: DEFAULT_PROJECT.to_string(),
            due_date: None,
            is_complete: false,
            date_completed: None,
            date_added: now,
            modified_at: now,
        })
    }

    /// Set the project (builder style, no timestamp bump).
    pub fn in_project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    /// Set the priority (builder style, no timestamp bump).
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the due date (builder style, no timestamp bump).
    pub fn due(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    /// Rename the task.
    pub fn rename(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), ValidationError> {
        validate_name(name)?;
        self.name = name.trim().to_string();
        self.touch(now);
        Ok(())
    }

    /// Mark the task complete.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.is_complete = true;
        self.date_completed = Some(now);
        self.touch(now);
    }

    /// Mark the task not complete.
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        self.is_complete = false;
        self.date_completed = None;
        self.touch(now);
    }

    /// Change the priority.
    pub fn set_priority(&mut self, priority: TaskPriority, now: DateTime<Utc>) {
        self.priority = priority;
        self.touch(now);
    }

    /// Move the task to another project.
    pub fn move_to_project(&mut self, project: &str, now: DateTime<Utc>) {
        self.project = project.to_string();
        self.touch(now);
    }

    /// Change or clear the due date.
    pub fn set_due_date(&mut self, due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) {
        self.due_date = due_date;
        self.touch(now);
    }

    /// Record a mutation at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modified_at = next_modified(self.modified_at, now);
    }

    /// Whether this task belongs to `project` (case-insensitive).
    pub fn belongs_to(&self, project: &str) -> bool {
        self.project.eq_ignore_ascii_case(project)
    }
}

impl SyncEntity for Task {
    const KIND: EntityKind = EntityKind::Task;

    fn entity_id(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    fn conflict(local: Self, remote: Self) -> SyncConflict {
        SyncConflict::Task { local, remote }
    }

    fn into_resolution(self) -> SyncResolution {
        SyncResolution::Task(self)
    }

    fn from_resolution(resolution: &SyncResolution) -> Option<&Self> {
        resolution.as_task()
    }
}

/// A named group of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Stable identity.
    pub id: ProjectId,
    /// Display name; tasks refer to projects by name.
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the project was created.
    pub created_at: DateTime<Utc>,
    /// Last modification instant.
    pub modified_at: DateTime<Utc>,
}

impl Project {
    /// Create a new project.
    pub fn new(name: &str, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        validate_name(name)?;
        Ok(Self {
            id: ProjectId::new(),
            name: name.trim().to_string(),
            description: None,
            created_at: now,
            modified_at: now,
        })
    }

    /// Set the description (builder style, no timestamp bump).
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Rename the project.
    pub fn rename(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), ValidationError> {
        validate_name(name)?;
        self.name = name.trim().to_string();
        self.touch(now);
        Ok(())
    }

    /// Change or clear the description.
    pub fn set_description(&mut self, description: Option<String>, now: DateTime<Utc>) {
        self.description = description;
        self.touch(now);
    }

    /// Record a mutation at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.modified_at = next_modified(self.modified_at, now);
    }
}

impl SyncEntity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn entity_id(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    fn conflict(local: Self, remote: Self) -> SyncConflict {
        SyncConflict::Project { local, remote }
    }

    fn into_resolution(self) -> SyncResolution {
        SyncResolution::Project(self)
    }

    fn from_resolution(resolution: &SyncResolution) -> Option<&Self> {
        resolution.as_project()
    }
}

/// Strictly increasing successor of `current`, preferring `now`.
fn next_modified(current: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > current {
        now
    } else {
        current + Duration::milliseconds(1)
    }
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(())
}
