//! Run sync cycles.

use anyhow::Result;
use tasksync_client::{spawn_cache_sweeper, SyncError};
use tasksync_core::SyncEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::config::Workspace;

/// Run the sync command.
pub async fn run(workspace: &Workspace) -> Result<()> {
    let coordinator = workspace.coordinator();

    match coordinator.sync_now().await {
        Ok(result) => {
            println!("Sync complete: {}", result);
            for conflict in &result.conflicts {
                println!(
                    "  conflict: {} {} (local {}, remote {})",
                    conflict.kind(),
                    conflict.entity_id(),
                    conflict.local_modified().format("%Y-%m-%d %H:%M:%S"),
                    conflict.remote_modified().format("%Y-%m-%d %H:%M:%S")
                );
            }
            if result.push_deferred {
                println!("Upload failed; it will be retried on the next sync.");
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}

/// Run the watch command.
///
/// Watching always runs the auto-sync timer, whatever `sync.auto_sync` says.
pub async fn watch(mut workspace: Workspace, interval: Option<u64>, count: Option<usize>) -> Result<()> {
    if let Some(secs) = interval {
        workspace.config.sync.interval_secs = secs;
    }
    workspace.config.sync.auto_sync = true;
    let coordinator = workspace.coordinator();
    let sweeper = spawn_cache_sweeper(workspace.cache(), workspace.config.cache.sweep_interval());
    let mut events = coordinator.subscribe();

    println!(
        "Watching (every {}s). Press Ctrl-C to stop.",
        coordinator.config().interval().as_secs()
    );

    coordinator.start();
    // Cycles report through events; only rejections need handling here.
    match coordinator.sync_now().await {
        Err(e @ (SyncError::RemoteUnavailable | SyncError::AlreadyInProgress)) => {
            println!("{}", e.user_message());
        }
        Ok(_) | Err(_) => {}
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut completed = 0;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("Stopping.");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", describe(&event));
                    if matches!(event, SyncEvent::SyncCompleted(_)) {
                        completed += 1;
                        if count.is_some_and(|n| completed >= n) {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} sync events", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    coordinator.shutdown();
    sweeper.abort();
    Ok(())
}

/// One-line rendering of a sync event.
fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::SyncStarted { trigger } => format!("sync started ({})", trigger),
        SyncEvent::SyncCompleted(result) => format!("sync complete: {}", result),
        SyncEvent::SyncFailed { trigger, error } => format!("sync failed ({}): {}", trigger, error),
        SyncEvent::PushDeferred {
            kind,
            attempt,
            retry_in,
        } => format!(
            "{} upload failed (attempt {}), retrying in {}s",
            kind,
            attempt,
            retry_in.as_secs()
        ),
        SyncEvent::PushDelivered { kind } => format!("{} upload delivered", kind),
        SyncEvent::PushDropped { kind, attempts } => {
            format!("{} upload dropped after {} attempts", kind, attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{init, task};
    use tasksync_client::LocalDataSource;
    use tasksync_core::SyncTrigger;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sync_fails_without_remote() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), None).unwrap();

        let error = run(&workspace).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<SyncError>(),
            Some(SyncError::RemoteUnavailable)
        ));
    }

    #[tokio::test]
    async fn two_devices_converge_through_shared_remote() {
        let shared = tempdir().unwrap();
        let laptop = tempdir().unwrap();
        let phone = tempdir().unwrap();
        init::run(laptop.path(), None, Some(shared.path())).await.unwrap();
        init::run(phone.path(), None, Some(shared.path())).await.unwrap();

        let laptop_ws = Workspace::open(laptop.path(), None).unwrap();
        task::add_task(&laptop_ws, "Book flights", None, None, None)
            .await
            .unwrap();
        run(&laptop_ws).await.unwrap();

        let phone_ws = Workspace::open(phone.path(), None).unwrap();
        run(&phone_ws).await.unwrap();

        let tasks = phone_ws.local().load_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Book flights");
        assert!(phone_ws.local().last_sync_timestamp().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn watch_stops_after_count() {
        let dir = tempdir().unwrap();
        init::run(dir.path(), None, None).await.unwrap();
        let workspace = Workspace::open(dir.path(), None).unwrap();

        tokio::time::timeout(
            std::time::Duration::from_secs(10),
            watch(workspace, Some(1), Some(2)),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[test]
    fn describe_events() {
        assert_eq!(
            describe(&SyncEvent::SyncStarted {
                trigger: SyncTrigger::AutoSync
            }),
            format!("sync started ({})", SyncTrigger::AutoSync)
        );
        assert!(describe(&SyncEvent::PushDropped {
            kind: tasksync_types::EntityKind::Task,
            attempts: 5
        })
        .contains("after 5 attempts"));
    }
}
