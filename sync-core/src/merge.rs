//! Identity-keyed merge of local and remote collections.
//!
//! The merge starts from the local collection in local order, replaces every
//! conflicting identity with its resolution value, then appends remote
//! entities whose identity is not present locally. The outcome records
//! which identities were added, updated and deleted, so cycle summaries are
//! built from explicit sets rather than from collection sizes.

use std::collections::{BTreeSet, HashMap, HashSet};
use tasksync_types::{SyncConflict, SyncEntity, SyncResolution};
use uuid::Uuid;

/// Result of merging one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<E> {
    /// Converged collection: local order first, then remote-only entities.
    pub merged: Vec<E>,
    /// Identities that exist only remotely and were appended.
    pub added: BTreeSet<Uuid>,
    /// Identities whose value was replaced by a resolution.
    pub updated: BTreeSet<Uuid>,
    /// Identities dropped by the merge. Always empty under union.
    pub deleted: BTreeSet<Uuid>,
    /// Resolutions of this kind that did not match any conflict.
    pub unmatched_resolutions: Vec<Uuid>,
}

/// Merge local and remote collections of one kind.
///
/// `conflicts` and `resolutions` may contain entries for other kinds; only
/// those of `E::KIND` are considered. A resolution is applied only when its
/// identity matches a detected conflict.
pub fn merge_entities<E: SyncEntity>(
    local: &[E],
    remote: &[E],
    conflicts: &[SyncConflict],
    resolutions: &[SyncResolution],
) -> MergeOutcome<E> {
    let conflicting: HashSet<Uuid> = conflicts
        .iter()
        .filter(|c| c.kind() == E::KIND)
        .map(SyncConflict::entity_id)
        .collect();

    let mut resolved: HashMap<Uuid, &E> = HashMap::new();
    let mut unmatched_resolutions = Vec::new();
    for resolution in resolutions {
        let Some(value) = E::from_resolution(resolution) else {
            continue;
        };
        let id = value.entity_id();
        if conflicting.contains(&id) {
            // Last resolution for an identity wins.
            resolved.insert(id, value);
        } else {
            unmatched_resolutions.push(id);
        }
    }

    let mut merged = Vec::with_capacity(local.len() + remote.len());
    let mut seen = HashSet::with_capacity(local.len() + remote.len());
    let mut updated = BTreeSet::new();

    for entity in local {
        let id = entity.entity_id();
        if !seen.insert(id) {
            continue;
        }
        match resolved.get(&id) {
            Some(value) => {
                merged.push((*value).clone());
                updated.insert(id);
            }
            None => merged.push(entity.clone()),
        }
    }

    let mut added = BTreeSet::new();
    for entity in remote {
        let id = entity.entity_id();
        if seen.insert(id) {
            merged.push(entity.clone());
            added.insert(id);
        }
    }

    MergeOutcome {
        merged,
        added,
        updated,
        deleted: BTreeSet::new(),
        unmatched_resolutions,
    }
}
