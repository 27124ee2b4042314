//! Show store and remote status.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tasksync_client::{LocalDataSource, RemoteDataSource};

use crate::config::Workspace;

/// Run the status command.
pub async fn run(workspace: &Workspace) -> Result<()> {
    println!("=== tasksync status ===");
    println!();

    println!("Config:");
    match &workspace.config_path {
        Some(path) => println!("  File:     {}", path.display()),
        None => println!("  File:     none (defaults)"),
    }
    println!("  Strategy: {}", workspace.config.sync.strategy);
    println!(
        "  Auto-sync: {} (every {}s)",
        if workspace.config.sync.auto_sync { "on" } else { "off" },
        workspace.config.sync.interval().as_secs()
    );
    println!();

    let local = workspace.local();
    println!("Local store:");
    println!("  Path:     {}", local.path().display());
    match (local.load_tasks().await, local.load_projects().await) {
        (Ok(tasks), Ok(projects)) => {
            let open = tasks.iter().filter(|t| !t.is_complete).count();
            println!("  Tasks:    {} ({} open)", tasks.len(), open);
            println!("  Projects: {}", projects.len());
        }
        (Err(e), _) | (_, Err(e)) => println!("  UNREADABLE: {}", e),
    }
    let last_sync = local.last_sync_timestamp().await.ok().flatten();
    println!("  Last sync: {}", format_last_sync(last_sync, Utc::now()));
    println!();

    let remote = workspace.remote();
    println!("Remote:");
    println!("  Document: {}", remote.document_path().display());
    if remote.is_available().await {
        println!("  Status:   AVAILABLE");
    } else {
        println!("  Status:   UNAVAILABLE");
        println!();
        println!("Create the remote directory or fix [storage] remote_dir.");
    }

    Ok(())
}

/// Describe the last sync relative to `now`.
fn format_last_sync(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "never".to_string();
    };
    let diff = (now - last).num_seconds().max(0);

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}
