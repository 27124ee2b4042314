//! # sync-types
//!
//! Domain entities and sync data model for tasksync.
//!
//! This crate provides the foundational types used across all tasksync crates:
//! - [`TaskId`], [`ProjectId`] - Identity types
//! - [`Task`], [`Project`] - Entities, with [`SyncEntity`] as their common view
//! - [`SyncConflict`], [`SyncResolution`], [`ConflictStrategy`] - Conflict model
//! - [`SyncResult`] - Summary of one sync cycle
//! - [`ValidationError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conflict;
mod entity;
mod error;
mod ids;
mod result;

pub use conflict::{ConflictStrategy, SyncConflict, SyncResolution};
pub use entity::{
    EntityKind, Project, SyncEntity, Task, TaskPriority, DEFAULT_PROJECT, MAX_NAME_LEN,
};
pub use error::ValidationError;
pub use ids::{ProjectId, TaskId};
pub use result::SyncResult;
