//! Client aggregate cache.
//!
//! Maintains a locally reconciled mirror of one or more organizations'
//! [`SharedProgress`] snapshots. Incremental deltas are applied map-cell by
//! map-cell and never recomputed from a full scan; the periodic full refresh
//! always overwrites, so after any finite delta sequence plus one refresh the
//! mirror equals a fresh server-side recomputation exactly.

pub mod optimistic;

pub use optimistic::OptimisticValue;

use crate::aggregation::{MinutePair, SharedProgress};
use crate::realtime::ProgressChange;
use crate::store::UserSummary;
use std::collections::HashMap;

/// Local mirror of aggregation output, keyed by organization.
#[derive(Debug, Default)]
pub struct ProgressCache {
    snapshots: HashMap<String, SharedProgress>,
}

impl ProgressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, org_id: &str) -> Option<&SharedProgress> {
        self.snapshots.get(org_id)
    }

    /// Apply one incremental delta: overwrite the item-level tuple and fold
    /// the element-wise difference into the subject and overall tuples for
    /// the same (organization, user). Missing cells start at `[0, 0]`.
    pub fn apply(&mut self, change: &ProgressChange) {
        let snapshot = self
            .snapshots
            .entry(change.organization.clone())
            .or_insert_with(|| SharedProgress::new(change.organization.clone()));

        let item_cell = snapshot
            .items
            .entry(change.item.clone())
            .or_default()
            .entry(change.user.clone())
            .or_default();
        let diff = change.new_progress - *item_cell;
        *item_cell = change.new_progress;

        *snapshot
            .subjects
            .entry(change.subject.clone())
            .or_default()
            .entry(change.user.clone())
            .or_default() += diff;
        *snapshot.overall.entry(change.user.clone()).or_default() += diff;
    }

    /// Ground-truth refresh: each snapshot wholesale replaces the cached one
    /// for its organization, discarding any drift.
    pub fn full_refresh(&mut self, snapshots: impl IntoIterator<Item = SharedProgress>) {
        for snapshot in snapshots {
            self.snapshots
                .insert(snapshot.organization.clone(), snapshot);
        }
    }

    /// Update a member's display summary in place across all mirrored
    /// organizations.
    pub fn user_updated(&mut self, summary: &UserSummary) {
        for snapshot in self.snapshots.values_mut() {
            if let Some(existing) = snapshot.users.iter_mut().find(|u| u.id == summary.id) {
                *existing = summary.clone();
            }
        }
    }

    /// The cached overall tuple for one user, `[0, 0]` when absent.
    pub fn overall(&self, org_id: &str, user_id: &str) -> MinutePair {
        self.snapshots
            .get(org_id)
            .and_then(|s| s.overall.get(user_id))
            .copied()
            .unwrap_or_default()
    }
}
