//! Identifier reconciliation
//!
//! Derives which objects to insert, purge-for-update and soft-delete from the
//! three identifier snapshots read at the start of a run.

use std::collections::BTreeSet;

use serde::Serialize;

use super::ObjectId;

/// Insert / update / delete decisions for one run.
///
/// `to_update` is always a subset of `to_insert`: updated objects are purged
/// and then re-fetched, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub to_insert: BTreeSet<ObjectId>,
    pub to_update: BTreeSet<ObjectId>,
    pub to_delete: BTreeSet<ObjectId>,
}

impl ActionPlan {
    /// Computes the plan from one consistent snapshot.
    ///
    /// - `to_insert = (remote_all - local) | remote_updated`
    /// - `to_update = local & remote_updated`
    /// - `to_delete = local - remote_all`
    ///
    /// An updated id that the remote over-reports is still re-fetched.
    pub fn reconcile(
        remote_all: &BTreeSet<ObjectId>,
        remote_updated: &BTreeSet<ObjectId>,
        local: &BTreeSet<ObjectId>,
    ) -> Self {
        let to_insert = remote_all
            .difference(local)
            .chain(remote_updated.iter())
            .copied()
            .collect();
        let to_update = local.intersection(remote_updated).copied().collect();
        let to_delete = local.difference(remote_all).copied().collect();

        Self {
            to_insert,
            to_update,
            to_delete,
        }
    }

    /// Objects that are brand new (queued for insert but not an update).
    pub fn new_objects(&self) -> usize {
        self.to_insert.len() - self.to_update.len()
    }

    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Insert list in ascending id order, ready for batching.
    pub fn insert_queue(&self) -> Vec<ObjectId> {
        self.to_insert.iter().copied().collect()
    }
}
