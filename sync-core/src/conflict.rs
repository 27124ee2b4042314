//! Conflict detection and resolution policy.
//!
//! Detection compares local and remote copies by identity: a conflict
//! exists iff both sides hold the entity and their `modified_at` differ.
//! Entities present on one side only are never conflicts; the merge picks
//! them up.
//!
//! Resolution applies a [`ConflictStrategy`] to one conflict. It is pure so
//! remote collaborators and tests can share the same policy.

use std::collections::HashMap;
use tasksync_types::{
    ConflictStrategy, Project, SyncConflict, SyncEntity, SyncResolution, Task,
};
use uuid::Uuid;

/// Detect conflicts between a local and a remote collection of one kind.
///
/// Output follows local order.
pub fn detect_conflicts<E: SyncEntity>(local: &[E], remote: &[E]) -> Vec<SyncConflict> {
    let remote_by_id: HashMap<Uuid, &E> = remote.iter().map(|e| (e.entity_id(), e)).collect();

    local
        .iter()
        .filter_map(|local_entity| {
            let remote_entity = remote_by_id.get(&local_entity.entity_id())?;
            if remote_entity.modified_at() != local_entity.modified_at() {
                Some(E::conflict(local_entity.clone(), (*remote_entity).clone()))
            } else {
                None
            }
        })
        .collect()
}

/// Detect task conflicts.
pub fn detect_task_conflicts(local: &[Task], remote: &[Task]) -> Vec<SyncConflict> {
    detect_conflicts(local, remote)
}

/// Detect project conflicts.
pub fn detect_project_conflicts(local: &[Project], remote: &[Project]) -> Vec<SyncConflict> {
    detect_conflicts(local, remote)
}

/// Resolve one conflict with the given strategy.
pub fn resolve_conflict(conflict: &SyncConflict, strategy: ConflictStrategy) -> SyncResolution {
    match conflict {
        SyncConflict::Task { local, remote } => pick(local, remote, strategy).into_resolution(),
        SyncConflict::Project { local, remote } => pick(local, remote, strategy).into_resolution(),
    }
}

/// Resolve every conflict with the given strategy, preserving order.
pub fn resolve_all(conflicts: &[SyncConflict], strategy: ConflictStrategy) -> Vec<SyncResolution> {
    conflicts
        .iter()
        .map(|c| resolve_conflict(c, strategy))
        .collect()
}

fn pick<E: SyncEntity>(local: &E, remote: &E, strategy: ConflictStrategy) -> E {
    match strategy {
        ConflictStrategy::KeepLocal => local.clone(),
        ConflictStrategy::KeepRemote => remote.clone(),
        // Ties cannot reach here from detection; local wins if they do.
        ConflictStrategy::KeepNewest => {
            if remote.modified_at() > local.modified_at() {
                remote.clone()
            } else {
                local.clone()
            }
        }
    }
}
