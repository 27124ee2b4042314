//! Initialize a data directory.

use anyhow::{Context, Result};
use std::path::Path;
use tasksync_client::Config;

use crate::config::{Workspace, CONFIG_FILE};

/// Run the init command.
pub async fn run(data_dir: &Path, config: Option<&Path>, remote_dir: Option<&Path>) -> Result<()> {
    let config_path = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE));

    // Check if already initialized
    if config_path.exists() {
        anyhow::bail!(
            "Already initialized. Delete {} to reinitialize.",
            config_path.display()
        );
    }

    let mut settings = Config::default();
    if let Some(dir) = remote_dir {
        settings.storage.remote_dir = dir.to_path_buf();
    }
    tokio::fs::write(&config_path, settings.to_toml()?)
        .await
        .context("Failed to write configuration")?;

    let workspace = Workspace::with_config(data_dir, settings, Some(config_path.clone()));
    workspace
        .local()
        .initialize()
        .await
        .context("Failed to create local store")?;

    let remote = workspace.remote();
    let remote_path = workspace.config.storage.remote_dir_in(data_dir);
    tokio::fs::create_dir_all(&remote_path)
        .await
        .context("Failed to create remote directory")?;

    println!("Initialized tasksync!");
    println!();
    println!("  Config:   {}", config_path.display());
    println!("  Store:    {}", workspace.local().path().display());
    println!("  Remote:   {}", remote.document_path().display());
    println!();
    println!("Next steps:");
    println!("  1. Add a task: tasksync add-task \"Buy milk\"");
    println!("  2. Sync:       tasksync sync");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_creates_config_store_and_remote() {
        let dir = tempdir().unwrap();
        run(dir.path(), None, None).await.unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert!(dir.path().join("tasks.json").exists());
        assert!(dir.path().join("remote").is_dir());

        let workspace = Workspace::open(dir.path(), None).unwrap();
        assert_eq!(workspace.config, Config::default());
    }

    #[tokio::test]
    async fn init_records_remote_dir() {
        let dir = tempdir().unwrap();
        let shared = tempdir().unwrap();
        run(dir.path(), None, Some(shared.path())).await.unwrap();

        let workspace = Workspace::open(dir.path(), None).unwrap();
        assert_eq!(workspace.config.storage.remote_dir, shared.path());
    }

    #[tokio::test]
    async fn init_fails_if_already_initialized() {
        let dir = tempdir().unwrap();

        // First init should succeed
        run(dir.path(), None, None).await.unwrap();

        // Second init should fail
        let result = run(dir.path(), None, None).await;
        assert!(result.is_err());
    }
}
