//! Configuration and store wiring for the CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasksync_cache::{Cache, MemoryCache};
use tasksync_client::{
    CachedRepository, Config, JsonFileLocalSource, JsonFileRemoteSource, SyncCoordinator,
};
use tasksync_core::SystemClock;

/// Configuration file name inside the data directory.
pub const CONFIG_FILE: &str = "tasksync.toml";

/// Coordinator over the JSON file stores.
pub type FileCoordinator = SyncCoordinator<JsonFileLocalSource, JsonFileRemoteSource>;

/// An opened data directory.
#[derive(Debug)]
pub struct Workspace {
    /// Data directory.
    pub data_dir: PathBuf,
    /// Effective configuration.
    pub config: Config,
    /// Where the configuration came from, if a file was read.
    pub config_path: Option<PathBuf>,
    local: Arc<JsonFileLocalSource>,
    cache: Arc<MemoryCache>,
}

impl Workspace {
    /// Open `data_dir`, reading `config` or `<data_dir>/tasksync.toml` if
    /// present. Without a file every setting takes its default.
    pub fn open(data_dir: &Path, config: Option<&Path>) -> Result<Self> {
        let default_path = data_dir.join(CONFIG_FILE);
        let config_path = match config {
            Some(path) => Some(path.to_path_buf()),
            None if default_path.exists() => Some(default_path),
            None => None,
        };
        let config = match &config_path {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => Config::default(),
        };
        Ok(Self::with_config(data_dir, config, config_path))
    }

    /// Build a workspace from an already loaded configuration.
    pub fn with_config(data_dir: &Path, config: Config, config_path: Option<PathBuf>) -> Self {
        let local = Arc::new(JsonFileLocalSource::new(
            config.storage.local_path_in(data_dir),
        ));
        Self {
            data_dir: data_dir.to_path_buf(),
            config,
            config_path,
            local,
            cache: Arc::new(MemoryCache::new()),
        }
    }

    /// Local store.
    pub fn local(&self) -> Arc<JsonFileLocalSource> {
        Arc::clone(&self.local)
    }

    /// Shared remote.
    pub fn remote(&self) -> JsonFileRemoteSource {
        JsonFileRemoteSource::new(self.config.storage.remote_dir_in(&self.data_dir))
    }

    /// Process-wide cache.
    pub fn cache(&self) -> Arc<dyn Cache> {
        self.cache.clone()
    }

    /// Cache-aside reads and invalidating writes over the local store.
    pub fn repository(&self) -> CachedRepository<JsonFileLocalSource> {
        CachedRepository::new(self.local(), self.cache(), self.config.cache.ttls())
    }

    /// Sync coordinator over the local store and the remote.
    pub fn coordinator(&self) -> FileCoordinator {
        SyncCoordinator::new(
            self.config.sync.clone(),
            self.local(),
            Arc::new(self.remote()),
            self.cache(),
            Arc::new(SystemClock),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_without_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::open(dir.path(), None).unwrap();

        assert_eq!(workspace.config, Config::default());
        assert!(workspace.config_path.is_none());
        assert_eq!(workspace.local().path(), dir.path().join("tasks.json"));
        assert_eq!(
            workspace.remote().document_path(),
            dir.path().join("remote").join(tasksync_client::REMOTE_FILE_NAME)
        );
    }

    #[test]
    fn open_reads_config_from_data_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[storage]\nlocal_path = \"store.json\"\n",
        )
        .unwrap();

        let workspace = Workspace::open(dir.path(), None).unwrap();

        assert_eq!(workspace.local().path(), dir.path().join("store.json"));
        assert_eq!(workspace.config_path, Some(dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn open_reports_bad_config() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[sync\n").unwrap();

        let error = Workspace::open(dir.path(), None).unwrap_err();
        assert!(error.to_string().contains("Failed to load"));
    }
}
