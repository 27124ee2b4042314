//! # sync-cache
//!
//! Thread-safe TTL cache for tasksync.
//!
//! The cache is never a system of record: it holds decoded task and
//! project lists for the read paths and is cleared after every sync cycle.
//!
//! - [`Cache`] - object-safe, byte-level contract
//! - [`TypedCache`] - serde encoding on top of any `Cache`
//! - [`MemoryCache`] - whole-cache reader/writer lock, lazy expiry eviction
//! - [`TaskCacheExt`] - per-day, per-project and project-list keys

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod domain;
mod entry;
mod error;
mod memory;

pub use cache::{Cache, TypedCache};
pub use domain::{
    tasks_for_date_key, tasks_for_project_key, CacheTtls, TaskCacheExt, PROJECTS_KEY,
};
pub use entry::{CacheEntry, CacheStatistics, Expiration};
pub use error::CacheError;
pub use memory::MemoryCache;
