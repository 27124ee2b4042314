//! # sync-core
//!
//! Pure logic for tasksync (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms for sync
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (local storage, remote calls) is performed by
//! `sync-client`, which interprets the actions produced by these state
//! machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod conflict;
pub mod merge;
pub mod retry;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{
    detect_conflicts, detect_project_conflicts, detect_task_conflicts, resolve_all,
    resolve_conflict,
};
pub use merge::{merge_entities, MergeOutcome};
pub use retry::{
    backoff_delay, PendingPush, PushPayload, PushQueue, RetryOutcome, DEFAULT_MAX_ATTEMPTS,
};
pub use state::{
    Action, Event, NetworkStatus, RejectReason, SyncEvent, SyncState, SyncTrigger,
};
