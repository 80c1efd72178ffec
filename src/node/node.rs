//! The paceboard node.
//!
//! Combines the record store, membership fan-out engine, aggregation engine
//! and real-time channel into the operation surface the routing/contract
//! layer calls. Every mutation runs to completion — shadow-record fan-out,
//! aggregation delta, broadcast — before it returns, and every broadcast is
//! emitted only after the corresponding persistence write, so a client that
//! re-fetches on receipt observes durable state.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

use crate::aggregation::{Aggregator, MinutePair, SharedProgress};
use crate::error::{PaceboardError, PaceboardResult};
use crate::fanout::{FanoutReport, MembershipFanout};
use crate::node::config::NodeConfig;
use crate::realtime::{ProgressChange, RealtimeChannel, RefreshDomain, ServerEvent};
use crate::store::{
    new_record_id, Filter, Organization, PublicItem, Range, RecordStore, SledStore, StoreResult,
    Subject, User, UserItem, UserSummary,
};

/// Input for creating a public item.
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub subject: String,
    pub description: String,
    pub estimate_minutes: f64,
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

/// Partial update of a public item; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemUpdate {
    pub item: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub estimate_minutes: Option<f64>,
    #[serde(default)]
    pub range: Option<Range>,
    /// `Some(None)` detaches the item from its organization.
    #[serde(default, with = "double_option")]
    pub organization: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
}

/// Partial update of the caller's own tracking record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserItemUpdate {
    pub user_item: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub estimate_minutes: Option<f64>,
    #[serde(default)]
    pub confirmed: Option<bool>,
    #[serde(default)]
    pub note: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// A node instance wiring store, fan-out, aggregation and the real-time
/// channel handle it was given.
pub struct PaceboardNode<S: RecordStore> {
    store: Arc<S>,
    fanout: MembershipFanout<S>,
    aggregator: Aggregator<S>,
    channel: RealtimeChannel,
    config: NodeConfig,
}

impl PaceboardNode<SledStore> {
    /// Open a node over the embedded sled store at the configured path.
    pub fn open(config: NodeConfig, channel: RealtimeChannel) -> PaceboardResult<Self> {
        let store = Arc::new(SledStore::open(&config.storage_path)?);
        Ok(Self::with_store(store, channel, config))
    }
}

impl<S: RecordStore> PaceboardNode<S> {
    /// Build a node over any record store adapter.
    pub fn with_store(store: Arc<S>, channel: RealtimeChannel, config: NodeConfig) -> Self {
        let fanout = MembershipFanout::new(Arc::clone(&store));
        let aggregator = Aggregator::with_policy(Arc::clone(&store), config.staleness_policy());
        info!("paceboard node up (build {})", config.build_tag);
        Self {
            store,
            fanout,
            aggregator,
            channel,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Resolve the acting user; an unknown id means the credential the
    /// routing layer validated no longer maps to an account.
    async fn authenticate(&self, actor: &str) -> PaceboardResult<User> {
        self.store
            .get::<User>(actor)
            .await?
            .ok_or_else(|| PaceboardError::Authentication(format!("unknown user {}", actor)))
    }

    /// Aggregated snapshots for the requested organizations. The actor must
    /// be a member of each.
    pub async fn get_progress(
        &self,
        actor: &str,
        org_ids: &[String],
    ) -> PaceboardResult<Vec<SharedProgress>> {
        let user = self.authenticate(actor).await?;
        for org_id in org_ids {
            let organization: Organization = self.store.get_required(org_id).await?;
            if !user.is_member_of(org_id) && !organization.is_authority(&user.id) {
                return Err(PaceboardError::Authorization(format!(
                    "{} is not a member of {}",
                    user.id, org_id
                )));
            }
        }
        Ok(self.aggregator.compute_progress(org_ids).await?)
    }

    /// Create a public item together with the author's own auto-confirmed
    /// tracking record, then fan out fellow items when the item is shared.
    pub async fn create_item(&self, actor: &str, draft: NewItem) -> PaceboardResult<PublicItem> {
        let user = self.authenticate(actor).await?;
        if draft.estimate_minutes <= 0.0 {
            return Err(PaceboardError::Validation(
                "estimate_minutes must be positive".into(),
            ));
        }
        if draft.description.trim().is_empty() {
            return Err(PaceboardError::Validation("description is empty".into()));
        }
        if draft.range != Range::Private && draft.organization.is_none() {
            return Err(PaceboardError::Validation(
                "a shared item needs an organization".into(),
            ));
        }
        self.store.get_required::<Subject>(&draft.subject).await?;
        if let Some(org_id) = &draft.organization {
            self.store.get_required::<Organization>(org_id).await?;
            if !user.is_member_of(org_id) {
                return Err(PaceboardError::Authorization(format!(
                    "{} is not a member of {}",
                    user.id, org_id
                )));
            }
        }

        let item = PublicItem {
            id: new_record_id(),
            author: user.id.clone(),
            subject: draft.subject,
            description: draft.description,
            estimate_minutes: draft.estimate_minutes,
            range: draft.range,
            organization: draft.organization,
            deadline: draft.deadline,
            created: Utc::now(),
        };
        self.store.create(&item).await?;
        self.store
            .create(&UserItem {
                id: new_record_id(),
                user: user.id.clone(),
                public_item: item.id.clone(),
                estimate_minutes: item.estimate_minutes,
                progress: 0.0,
                confirmed: true,
                note: String::new(),
            })
            .await?;

        if item.range != Range::Private {
            let outcome = self.fanout.create_fellow_items(&user.id, &item).await;
            self.log_fanout_outcome("create_item", &item.id, outcome);
        }
        if let Some(org_id) = &item.organization {
            self.emit_refresh(org_id, &user.id);
        }
        Ok(item)
    }

    /// Update a public item; author or an organization authority only.
    /// Scope changes reconcile the fellow-item set before the refresh emit.
    pub async fn update_item(&self, actor: &str, update: ItemUpdate) -> PaceboardResult<bool> {
        let user = self.authenticate(actor).await?;
        let mut item: PublicItem = self.store.get_required(&update.item).await?;
        self.authorize_item_action(&user, &item).await?;

        if let Some(minutes) = update.estimate_minutes {
            if minutes <= 0.0 {
                return Err(PaceboardError::Validation(
                    "estimate_minutes must be positive".into(),
                ));
            }
        }
        if let Some(Some(org_id)) = &update.organization {
            self.store.get_required::<Organization>(org_id).await?;
        }

        let old_range = item.range;
        let old_org = item.organization.clone();

        if let Some(description) = update.description {
            item.description = description;
        }
        if let Some(minutes) = update.estimate_minutes {
            item.estimate_minutes = minutes;
        }
        if let Some(range) = update.range {
            item.range = range;
        }
        if let Some(organization) = update.organization {
            item.organization = organization;
        }
        if let Some(deadline) = update.deadline {
            item.deadline = deadline;
        }
        if item.range != Range::Private && item.organization.is_none() {
            return Err(PaceboardError::Validation(
                "a shared item needs an organization".into(),
            ));
        }

        // The authoritative write decides the mutation's success; fan-out
        // below is independent per user and never rolls it back.
        self.store.update(&item).await?;

        if item.organization != old_org {
            let outcome = self
                .fanout
                .reconcile_on_organization_change(
                    &user.id,
                    &item,
                    old_org.as_deref(),
                    item.organization.as_deref(),
                )
                .await;
            self.log_fanout_outcome("organization_change", &item.id, outcome);
        }
        if item.range != old_range {
            // Also runs after an organization move: fellows kept across the
            // move still need the confirmation side of the range transition.
            let outcome = self
                .fanout
                .reconcile_on_range_change(&user.id, &item, old_range, item.range)
                .await;
            self.log_fanout_outcome("range_change", &item.id, outcome);
        }

        for org_id in [old_org.as_ref(), item.organization.as_ref()]
            .into_iter()
            .flatten()
            .collect::<std::collections::BTreeSet<_>>()
        {
            self.emit_refresh(org_id, &user.id);
        }
        Ok(true)
    }

    /// Delete a public item: every referencing tracking record goes first, so
    /// aggregates stop reflecting the item even if the final delete fails.
    pub async fn delete_item(&self, actor: &str, item_id: &str) -> PaceboardResult<bool> {
        let user = self.authenticate(actor).await?;
        let item: PublicItem = self.store.get_required(item_id).await?;
        self.authorize_item_action(&user, &item).await?;

        let referencing = self
            .store
            .query::<UserItem>(&Filter::eq("public_item", item.id.clone()))
            .await?;
        for user_item in &referencing {
            self.store.delete::<UserItem>(&user_item.id).await?;
        }
        self.store.delete::<PublicItem>(&item.id).await?;
        info!(
            "item {} deleted by {} ({} tracking records removed)",
            item.id,
            user.id,
            referencing.len()
        );

        if let Some(org_id) = &item.organization {
            self.emit_refresh(org_id, &user.id);
        }
        Ok(true)
    }

    /// Update the caller's own tracking record and broadcast the new
    /// aggregate tuple to the item's organization room.
    pub async fn update_user_item(
        &self,
        actor: &str,
        update: UserItemUpdate,
    ) -> PaceboardResult<bool> {
        let user = self.authenticate(actor).await?;
        let mut user_item: UserItem = self.store.get_required(&update.user_item).await?;
        if user_item.user != user.id {
            return Err(PaceboardError::Authorization(format!(
                "user item {} belongs to another user",
                user_item.id
            )));
        }
        if let Some(progress) = update.progress {
            if !(0.0..=1.0).contains(&progress) {
                return Err(PaceboardError::Validation(
                    "progress must be within [0, 1]".into(),
                ));
            }
            user_item.progress = progress;
        }
        if let Some(minutes) = update.estimate_minutes {
            if minutes <= 0.0 {
                return Err(PaceboardError::Validation(
                    "estimate_minutes must be positive".into(),
                ));
            }
            user_item.estimate_minutes = minutes;
        }
        if let Some(confirmed) = update.confirmed {
            user_item.confirmed = confirmed;
        }
        if let Some(note) = update.note {
            user_item.note = note;
        }

        self.store.update(&user_item).await?;

        let item: PublicItem = self.store.get_required(&user_item.public_item).await?;
        if let Some(org_id) = &item.organization {
            // Unconfirmed records never aggregate, so their delta is the zero
            // tuple; anything else would drift every listening cache away from
            // the next recompute.
            let new_progress = if user_item.confirmed {
                MinutePair::contribution(user_item.progress, user_item.estimate_minutes)
            } else {
                MinutePair::default()
            };
            self.emit(
                org_id,
                ServerEvent::ProgressUpdated(ProgressChange {
                    organization: org_id.clone(),
                    item: item.id.clone(),
                    subject: item.subject.clone(),
                    user: user.id.clone(),
                    new_progress,
                }),
                None,
            );
        }
        Ok(true)
    }

    /// Join an organization: record the membership, backfill fellow items for
    /// the organization's existing shared items, and invalidate the room.
    pub async fn join_organization(&self, actor: &str, org_id: &str) -> PaceboardResult<()> {
        let mut user = self.authenticate(actor).await?;
        let organization: Organization = self.store.get_required(org_id).await?;

        if !user.is_member_of(org_id) {
            user.organizations.push(org_id.to_string());
            self.store.update(&user).await?;
        }
        let outcome = self.fanout.backfill_on_join(&user, &organization).await;
        self.log_fanout_outcome("join_backfill", org_id, outcome);
        self.emit_refresh(org_id, &user.id);
        Ok(())
    }

    /// Stamp what the user is working on; this check-in feeds the
    /// aggregation staleness guard.
    pub async fn update_working_on(
        &self,
        actor: &str,
        item_id: Option<String>,
    ) -> PaceboardResult<()> {
        let mut user = self.authenticate(actor).await?;
        if let Some(id) = &item_id {
            self.store.get_required::<PublicItem>(id).await?;
        }
        user.working_on = item_id;
        user.working_on_since = Some(Utc::now());
        self.store.update(&user).await?;

        let summary = UserSummary::from(&user);
        for org_id in &user.organizations {
            self.emit(
                org_id,
                ServerEvent::UserUpdated {
                    user: summary.clone(),
                },
                None,
            );
        }
        Ok(())
    }

    async fn authorize_item_action(&self, user: &User, item: &PublicItem) -> PaceboardResult<()> {
        if item.author == user.id {
            return Ok(());
        }
        if let Some(org_id) = &item.organization {
            let organization: Organization = self.store.get_required(org_id).await?;
            if organization.is_authority(&user.id) {
                return Ok(());
            }
        }
        Err(PaceboardError::Authorization(format!(
            "{} may not act on item {}",
            user.id, item.id
        )))
    }

    fn emit_refresh(&self, org_id: &str, acting_user: &str) {
        self.emit(
            org_id,
            ServerEvent::Refresh {
                except: acting_user.to_string(),
                domains: vec![RefreshDomain::Items, RefreshDomain::Share],
            },
            Some(acting_user),
        );
    }

    /// Post-mutation broadcast. The durable write already succeeded, so a
    /// shut-down channel only costs the delta; clients recover on their next
    /// full refresh.
    fn emit(&self, org_id: &str, event: ServerEvent, except_user: Option<&str>) {
        if let Err(e) = self.channel.publish_filtered(org_id, event, except_user) {
            warn!("broadcast to room {} skipped: {}", org_id, e);
        }
    }

    /// Fan-out runs after the authoritative write, so even a reconcile that
    /// failed outright is logged rather than surfaced; the refresh emit plus
    /// the periodic full refresh recover the fellow set.
    fn log_fanout_outcome(&self, operation: &str, target: &str, outcome: StoreResult<FanoutReport>) {
        match outcome {
            Ok(report) => {
                if !report.failed.is_empty() {
                    warn!(
                        "{} on {}: fan-out failed for users {:?}",
                        operation, target, report.failed
                    );
                }
            }
            Err(e) => warn!("{} on {}: fan-out skipped entirely: {}", operation, target, e),
        }
    }
}
