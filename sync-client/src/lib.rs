//! # sync-client
//!
//! Offline-first sync for tasks and projects.
//!
//! This is the main library that applications use to keep a local store in
//! step with a shared remote.
//!
//! ## Features
//!
//! - **Single-flight sync**: at most one cycle runs at a time
//! - **Atomic persistence**: merged state is committed in one local transaction
//! - **Push retry**: failed uploads are retried with exponential backoff
//! - **Cache-aside reads**: day, project and project-list reads go through a TTL cache
//! - **Pure State Machine**: Uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasksync_cache::MemoryCache;
//! use tasksync_client::{JsonFileLocalSource, JsonFileRemoteSource, SyncConfig, SyncCoordinator};
//! use tasksync_core::SystemClock;
//!
//! let coordinator = SyncCoordinator::new(
//!     SyncConfig::default(),
//!     Arc::new(JsonFileLocalSource::new("tasks.json")),
//!     Arc::new(JsonFileRemoteSource::new("/mnt/share/tasks")),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let result = coordinator.sync_now().await?;
//! println!("{result}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod repository;
pub mod source;
pub mod sweeper;

pub use config::{CacheConfig, Config, ConfigError, StorageConfig, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncPhase};
pub use repository::CachedRepository;
pub use source::{
    write_atomically, JsonFileLocalSource, JsonFileRemoteSource, LocalDataSource, LocalWrite,
    MemoryLocalSource, MockRemoteSource, RemoteDataSource, RemoteSnapshot, SourceError, Stamped,
    StoreSnapshot, REMOTE_FILE_NAME,
};
pub use sweeper::spawn_cache_sweeper;
