//! List tasks and projects.

use anyhow::Result;
use chrono::NaiveDate;
use tasksync_types::Task;

use super::task::short_id;
use crate::config::Workspace;

/// Run the list command.
pub async fn tasks(workspace: &Workspace, date: Option<NaiveDate>, project: Option<&str>) -> Result<()> {
    let repository = workspace.repository();
    let tasks = match (date, project) {
        (Some(date), _) => repository.tasks_for_date(date).await?,
        (None, Some(project)) => repository.tasks_for_project(project).await?,
        (None, None) => repository.tasks().await?,
    };

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for task in &tasks {
        println!("{}", format_task(task));
    }
    Ok(())
}

/// Run the projects command.
pub async fn projects(workspace: &Workspace) -> Result<()> {
    let projects = workspace.repository().projects().await?;

    if projects.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for project in &projects {
        match &project.description {
            Some(description) => println!("{} - {}", project.name, description),
            None => println!("{}", project.name),
        }
    }
    Ok(())
}

/// One-line rendering of a task.
fn format_task(task: &Task) -> String {
    let mark = if task.is_complete { "x" } else { " " };
    let mut line = format!(
        "[{}] {}  {}  ({}, {})",
        mark,
        short_id(&task.id.to_string()),
        task.name,
        task.project,
        task.priority
    );
    if let Some(due) = task.due_date {
        line.push_str(&format!(" due {}", due.date_naive()));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tasksync_types::TaskPriority;
    use tempfile::tempdir;

    #[test]
    fn format_task_shows_state_and_due_date() {
        let now = Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap();
        let mut task = Task::new("Water plants", now)
            .unwrap()
            .in_project("Home")
            .with_priority(TaskPriority::High)
            .due(now);

        let line = format_task(&task);
        assert!(line.starts_with("[ ] "));
        assert!(line.contains("Water plants  (Home, high) due 2025-06-16"));

        task.complete(now);
        assert!(format_task(&task).starts_with("[x] "));
    }

    #[tokio::test]
    async fn list_empty_store() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), None).unwrap();

        assert!(tasks(&workspace, None, None).await.is_ok());
        assert!(projects(&workspace).await.is_ok());
    }
}
