//! Membership fan-out engine.
//!
//! Keeps the per-user shadow ("fellow") UserItem set consistent with each
//! PublicItem's sharing scope. Fellow items are created, deleted and
//! re-confirmed only here, triggered by scope/organization changes or by a
//! user joining an organization.
//!
//! Per-user sub-operations run concurrently and independently: one user's
//! failure never aborts the others and never fails the parent mutation. Failed
//! writes are logged and counted in the returned [`FanoutReport`]; there is no
//! retry and no compensation — the periodic full refresh is the recovery path.

pub mod transition;

use crate::store::{
    new_record_id, Filter, Organization, PublicItem, Range, RecordStore, StoreError, StoreResult,
    User, UserItem,
};
use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use transition::{transition, RangeAction};

/// Outcome counters for one fan-out operation. `failed` lists the user ids
/// whose shadow-record write failed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub created: usize,
    pub deleted: usize,
    pub confirmed: usize,
    pub unconfirmed: usize,
    pub failed: Vec<String>,
}

impl FanoutReport {
    fn absorb(&mut self, other: FanoutReport) {
        self.created += other.created;
        self.deleted += other.deleted;
        self.confirmed += other.confirmed;
        self.unconfirmed += other.unconfirmed;
        self.failed.extend(other.failed);
    }
}

/// Engine reconciling fellow UserItems against item scope.
pub struct MembershipFanout<S: RecordStore> {
    store: Arc<S>,
}

impl<S: RecordStore> MembershipFanout<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Members of an organization, derived from the users' own membership
    /// lists.
    pub async fn organization_members(&self, org_id: &str) -> StoreResult<Vec<User>> {
        self.store
            .query::<User>(&Filter::contains("organizations", org_id))
            .await
    }

    /// Create a fellow UserItem for every member of the item's organization
    /// except the author. Idempotent per (item, user): existing pairs are
    /// skipped.
    pub async fn create_fellow_items(
        &self,
        acting_user: &str,
        item: &PublicItem,
    ) -> StoreResult<FanoutReport> {
        self.create_fellows(acting_user, item, item.range == Range::All)
            .await
    }

    async fn create_fellows(
        &self,
        acting_user: &str,
        item: &PublicItem,
        confirmed: bool,
    ) -> StoreResult<FanoutReport> {
        let Some(org_id) = item.organization.as_deref() else {
            return Ok(FanoutReport::default());
        };
        let members = self.organization_members(org_id).await?;
        let outcomes = join_all(
            members
                .iter()
                .filter(|member| member.id != item.author)
                .map(|member| self.create_fellow_for(item, &member.id, confirmed)),
        )
        .await;

        let mut report = FanoutReport::default();
        for (member, outcome) in members
            .iter()
            .filter(|member| member.id != item.author)
            .zip(outcomes)
        {
            match outcome {
                Ok(true) => report.created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "fellow item create failed for user {} on item {}: {}",
                        member.id, item.id, e
                    );
                    report.failed.push(member.id.clone());
                }
            }
        }
        debug!(
            "fan-out by {} on item {}: {} fellows created, {} failed",
            acting_user,
            item.id,
            report.created,
            report.failed.len()
        );
        Ok(report)
    }

    /// Create one fellow item unless a (item, user) pair already exists.
    /// Returns whether a record was created.
    async fn create_fellow_for(
        &self,
        item: &PublicItem,
        user_id: &str,
        confirmed: bool,
    ) -> StoreResult<bool> {
        let existing = self
            .store
            .query::<UserItem>(
                &Filter::eq("public_item", item.id.clone())
                    .and(Filter::eq("user", user_id.to_string())),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(false);
        }
        let fellow = UserItem {
            id: new_record_id(),
            user: user_id.to_string(),
            public_item: item.id.clone(),
            estimate_minutes: item.estimate_minutes,
            progress: 0.0,
            confirmed,
            note: String::new(),
        };
        match self.store.create(&fellow).await {
            Ok(()) => Ok(true),
            // A concurrent fan-out won the race; the pair exists, which is
            // what we wanted.
            Err(StoreError::Duplicate { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete fellow items for a public item, optionally keeping one user's.
    /// The author's own item is never a fellow and is always kept.
    pub async fn delete_fellow_items(
        &self,
        item: &PublicItem,
        exclude_user: Option<&str>,
    ) -> StoreResult<FanoutReport> {
        let fellows = self.fellow_items(item, exclude_user).await?;
        let outcomes = join_all(
            fellows
                .iter()
                .map(|fellow| self.store.delete::<UserItem>(&fellow.id)),
        )
        .await;

        let mut report = FanoutReport::default();
        for (fellow, outcome) in fellows.iter().zip(outcomes) {
            match outcome {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "fellow item delete failed for user {} on item {}: {}",
                        fellow.user, item.id, e
                    );
                    report.failed.push(fellow.user.clone());
                }
            }
        }
        Ok(report)
    }

    /// Reconcile fellow items after the item moved between organizations:
    /// delete fellows of users no longer eligible, then create fellows for the
    /// new organization's members when the item is still shared. A private
    /// item has no eligible users at all, so every fellow goes.
    pub async fn reconcile_on_organization_change(
        &self,
        acting_user: &str,
        item: &PublicItem,
        _old_org: Option<&str>,
        new_org: Option<&str>,
    ) -> StoreResult<FanoutReport> {
        let eligible: Vec<String> = match new_org {
            Some(org_id) if item.range != Range::Private => self
                .organization_members(org_id)
                .await?
                .into_iter()
                .map(|u| u.id)
                .collect(),
            _ => Vec::new(),
        };

        let fellows = self.fellow_items(item, None).await?;
        let stale: Vec<&UserItem> = fellows
            .iter()
            .filter(|fellow| !eligible.iter().any(|id| *id == fellow.user))
            .collect();
        let outcomes = join_all(
            stale
                .iter()
                .map(|fellow| self.store.delete::<UserItem>(&fellow.id)),
        )
        .await;

        let mut report = FanoutReport::default();
        for (fellow, outcome) in stale.iter().zip(outcomes) {
            match outcome {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "stale fellow delete failed for user {} on item {}: {}",
                        fellow.user, item.id, e
                    );
                    report.failed.push(fellow.user.clone());
                }
            }
        }

        if item.range != Range::Private && new_org.is_some() {
            report.absorb(self.create_fellow_items(acting_user, item).await?);
        }
        Ok(report)
    }

    /// Apply the range transition table to an item whose scope changed.
    /// `item` already carries the new range.
    pub async fn reconcile_on_range_change(
        &self,
        acting_user: &str,
        item: &PublicItem,
        old_range: Range,
        new_range: Range,
    ) -> StoreResult<FanoutReport> {
        match transition(old_range, new_range) {
            RangeAction::Keep => Ok(FanoutReport::default()),
            RangeAction::CreateFellows { confirmed } => {
                self.create_fellows(acting_user, item, confirmed).await
            }
            RangeAction::DeleteFellows => self.delete_fellow_items(item, None).await,
            RangeAction::ConfirmFellows => self.set_fellow_confirmation(item, true, false).await,
            RangeAction::UnconfirmIdleFellows => {
                self.set_fellow_confirmation(item, false, true).await
            }
        }
    }

    /// Backfill fellow items for a user who just joined an organization:
    /// one per existing shared item not already tracked by the user,
    /// confirmed per that item's current range.
    pub async fn backfill_on_join(
        &self,
        user: &User,
        organization: &Organization,
    ) -> StoreResult<FanoutReport> {
        let shared_items = self
            .store
            .query::<PublicItem>(
                &Filter::eq("organization", organization.id.clone())
                    .and(Filter::any_of("range", ["some", "all"])),
            )
            .await?;

        let candidates: Vec<&PublicItem> = shared_items
            .iter()
            .filter(|item| item.author != user.id)
            .collect();
        let outcomes = join_all(
            candidates
                .iter()
                .map(|item| self.create_fellow_for(item, &user.id, item.range == Range::All)),
        )
        .await;

        let mut report = FanoutReport::default();
        for (item, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(true) => report.created += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "join backfill failed for user {} on item {}: {}",
                        user.id, item.id, e
                    );
                    report.failed.push(user.id.clone());
                }
            }
        }
        debug!(
            "join backfill for {} in {}: {} fellows created",
            user.id, organization.id, report.created
        );
        Ok(report)
    }

    /// Flip the confirmed flag on fellow items. With `idle_only`, only fellows
    /// with zero progress are touched, so recorded work stays confirmed.
    async fn set_fellow_confirmation(
        &self,
        item: &PublicItem,
        confirmed: bool,
        idle_only: bool,
    ) -> StoreResult<FanoutReport> {
        let fellows = self.fellow_items(item, None).await?;
        let targets: Vec<UserItem> = fellows
            .into_iter()
            .filter(|fellow| fellow.confirmed != confirmed)
            .filter(|fellow| !idle_only || fellow.progress == 0.0)
            .map(|mut fellow| {
                fellow.confirmed = confirmed;
                fellow
            })
            .collect();
        let outcomes = join_all(targets.iter().map(|fellow| self.store.update(fellow))).await;

        let mut report = FanoutReport::default();
        for (fellow, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    if confirmed {
                        report.confirmed += 1;
                    } else {
                        report.unconfirmed += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "fellow confirmation update failed for user {} on item {}: {}",
                        fellow.user, item.id, e
                    );
                    report.failed.push(fellow.user.clone());
                }
            }
        }
        Ok(report)
    }

    /// All UserItems referencing the item except the author's own, minus an
    /// optional extra exclusion.
    async fn fellow_items(
        &self,
        item: &PublicItem,
        exclude_user: Option<&str>,
    ) -> StoreResult<Vec<UserItem>> {
        let all = self
            .store
            .query::<UserItem>(&Filter::eq("public_item", item.id.clone()))
            .await?;
        Ok(all
            .into_iter()
            .filter(|ui| ui.user != item.author)
            .filter(|ui| exclude_user != Some(ui.user.as_str()))
            .collect())
    }
}
