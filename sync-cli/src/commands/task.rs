//! Create and update tasks and projects.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tasksync_types::{Project, Task, TaskPriority};

use crate::config::Workspace;

/// Run the add-task command.
pub async fn add_task(
    workspace: &Workspace,
    name: &str,
    project: Option<&str>,
    due: Option<NaiveDate>,
    priority: Option<TaskPriority>,
) -> Result<()> {
    let mut task = Task::new(name, Utc::now())?;
    if let Some(project) = project {
        task = task.in_project(project);
    }
    if let Some(date) = due {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .context("Invalid due date")?
            .and_utc();
        task = task.due(midnight);
    }
    if let Some(priority) = priority {
        task = task.with_priority(priority);
    }

    workspace.repository().save_task(task.clone()).await?;

    println!("Added task {} ({})", short_id(&task.id.to_string()), task.name);
    Ok(())
}

/// Run the add-project command.
pub async fn add_project(workspace: &Workspace, name: &str, description: Option<&str>) -> Result<()> {
    let repository = workspace.repository();
    let projects = repository.projects().await?;
    if projects.iter().any(|p| p.name.eq_ignore_ascii_case(name.trim())) {
        anyhow::bail!("Project '{}' already exists", name.trim());
    }

    let mut project = Project::new(name, Utc::now())?;
    if let Some(description) = description {
        project = project.with_description(description);
    }
    repository.save_project(project.clone()).await?;

    println!("Added project {}", project.name);
    Ok(())
}

/// Run the complete command.
pub async fn complete(workspace: &Workspace, id: &str) -> Result<()> {
    let repository = workspace.repository();
    let tasks = repository.tasks().await?;

    let mut matches = tasks
        .into_iter()
        .filter(|t| t.id.to_string().starts_with(id));
    let mut task = match (matches.next(), matches.next()) {
        (Some(task), None) => task,
        (None, _) => anyhow::bail!("No task with id '{}'", id),
        (Some(_), Some(_)) => anyhow::bail!("Id prefix '{}' matches more than one task", id),
    };

    if task.is_complete {
        println!("Task {} is already complete", short_id(&task.id.to_string()));
        return Ok(());
    }
    task.complete(Utc::now());
    repository.save_task(task.clone()).await?;

    println!("Completed {} ({})", short_id(&task.id.to_string()), task.name);
    Ok(())
}

/// First eight characters of an id, enough to pass to `complete`.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_client::LocalDataSource;
    use tempfile::tempdir;

    fn workspace(dir: &std::path::Path) -> Workspace {
        Workspace::open(dir, None).unwrap()
    }

    #[tokio::test]
    async fn add_task_saves_all_fields() {
        let dir = tempdir().unwrap();
        let workspace = workspace(dir.path());
        let date = NaiveDate::from_ymd_opt(2025, 6, 16).unwrap();

        add_task(&workspace, "Water plants", Some("Home"), Some(date), Some(TaskPriority::High))
            .await
            .unwrap();

        let tasks = workspace.local().load_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].project, "Home");
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[0].due_date.map(|d| d.date_naive()), Some(date));
    }

    #[tokio::test]
    async fn add_task_rejects_blank_name() {
        let dir = tempdir().unwrap();
        assert!(add_task(&workspace(dir.path()), "  ", None, None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn duplicate_project_is_rejected() {
        let dir = tempdir().unwrap();
        let workspace = workspace(dir.path());

        add_project(&workspace, "Work", None).await.unwrap();
        assert!(add_project(&workspace, "work", None).await.is_err());
    }

    #[tokio::test]
    async fn complete_by_prefix() {
        let dir = tempdir().unwrap();
        let workspace = workspace(dir.path());
        add_task(&workspace, "Ship it", None, None, None).await.unwrap();
        let id = workspace.local().load_tasks().await.unwrap()[0].id.to_string();

        complete(&workspace, short_id(&id)).await.unwrap();

        let tasks = workspace.local().load_tasks().await.unwrap();
        assert!(tasks[0].is_complete);
        assert!(tasks[0].date_completed.is_some());
    }

    #[tokio::test]
    async fn complete_unknown_id_fails() {
        let dir = tempdir().unwrap();
        assert!(complete(&workspace(dir.path()), "deadbeef").await.is_err());
    }

    #[test]
    fn short_id_handles_short_input() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
