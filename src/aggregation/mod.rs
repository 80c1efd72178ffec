//! Aggregation engine.
//!
//! Computes one [`SharedProgress`] snapshot per requested organization from the
//! confirmed UserItems, as pure tuple summation over `[done, total]` minute
//! pairs. Output is order-independent; authoritative recomputation here is the
//! ground truth that the client aggregate cache converges to.

use crate::store::{Filter, PublicItem, RecordStore, StoreResult, User, UserItem, UserSummary};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Add, AddAssign, Sub};
use std::sync::Arc;

/// A `[done, total]` minutes pair. Serializes to a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MinutePair(pub f64, pub f64);

impl MinutePair {
    /// Contribution of one user item: `[progress * estimate, estimate]`.
    pub fn contribution(progress: f64, estimate_minutes: f64) -> Self {
        MinutePair(progress * estimate_minutes, estimate_minutes)
    }

    pub fn done(&self) -> f64 {
        self.0
    }

    pub fn total(&self) -> f64 {
        self.1
    }
}

impl Add for MinutePair {
    type Output = MinutePair;

    fn add(self, rhs: MinutePair) -> MinutePair {
        MinutePair(self.0 + rhs.0, self.1 + rhs.1)
    }
}

impl AddAssign for MinutePair {
    fn add_assign(&mut self, rhs: MinutePair) {
        self.0 += rhs.0;
        self.1 += rhs.1;
    }
}

impl Sub for MinutePair {
    type Output = MinutePair;

    fn sub(self, rhs: MinutePair) -> MinutePair {
        MinutePair(self.0 - rhs.0, self.1 - rhs.1)
    }
}

/// Nested `(key, user) -> pair` map, the shape shared by all three levels.
pub type ProgressMap = HashMap<String, HashMap<String, MinutePair>>;

/// Aggregated progress snapshot for one organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedProgress {
    pub organization: String,
    /// item id -> user id -> [done, total]
    pub items: ProgressMap,
    /// subject id -> user id -> [done, total]
    pub subjects: ProgressMap,
    /// user id -> [done, total]
    pub overall: HashMap<String, MinutePair>,
    /// Member summaries, attached for display without extra lookups.
    pub users: Vec<UserSummary>,
}

impl SharedProgress {
    pub fn new(organization: impl Into<String>) -> Self {
        SharedProgress {
            organization: organization.into(),
            ..Default::default()
        }
    }
}

/// Guard excluding contributions from users who have not checked in since the
/// item appeared. Semantics under clock skew are tunable policy, not law: the
/// skew allowance absorbs drift between writers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StalenessPolicy {
    /// Count every confirmed user item.
    Disabled,
    /// Count a user's items only when the user checked in no earlier than
    /// `skew` before the item was created.
    ActiveSince { skew: Duration },
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        StalenessPolicy::ActiveSince {
            skew: Duration::minutes(5),
        }
    }
}

impl StalenessPolicy {
    /// Whether a user with the given last-activity stamp contributes to an
    /// item created at `item_created`.
    pub fn admits(&self, last_active: Option<DateTime<Utc>>, item_created: DateTime<Utc>) -> bool {
        match self {
            StalenessPolicy::Disabled => true,
            StalenessPolicy::ActiveSince { skew } => match last_active {
                Some(stamp) => stamp + *skew >= item_created,
                None => false,
            },
        }
    }
}

/// Computes per-organization progress snapshots.
pub struct Aggregator<S: RecordStore> {
    store: Arc<S>,
    policy: StalenessPolicy,
}

impl<S: RecordStore> Aggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policy: StalenessPolicy::default(),
        }
    }

    pub fn with_policy(store: Arc<S>, policy: StalenessPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    /// Compute one snapshot per requested organization: select confirmed
    /// UserItems of the organization's items, apply the staleness guard, and
    /// accumulate `[progress * estimate, estimate]` at item, subject and
    /// overall granularity.
    pub async fn compute_progress(&self, org_ids: &[String]) -> StoreResult<Vec<SharedProgress>> {
        let mut snapshots = Vec::with_capacity(org_ids.len());
        for org_id in org_ids {
            snapshots.push(self.compute_for_organization(org_id).await?);
        }
        Ok(snapshots)
    }

    async fn compute_for_organization(&self, org_id: &str) -> StoreResult<SharedProgress> {
        let members = self
            .store
            .query::<User>(&Filter::contains("organizations", org_id))
            .await?;
        let items = self
            .store
            .query::<PublicItem>(&Filter::eq("organization", org_id.to_string()))
            .await?;

        let mut snapshot = SharedProgress::new(org_id);
        snapshot.users = members.iter().map(UserSummary::from).collect();
        if items.is_empty() {
            return Ok(snapshot);
        }

        let activity: HashMap<&str, Option<DateTime<Utc>>> = members
            .iter()
            .map(|u| (u.id.as_str(), u.working_on_since))
            .collect();
        let item_index: HashMap<&str, &PublicItem> =
            items.iter().map(|i| (i.id.as_str(), i)).collect();

        let confirmed = self
            .store
            .query::<UserItem>(
                &Filter::any_of("public_item", items.iter().map(|i| i.id.clone()))
                    .and(Filter::eq("confirmed", true)),
            )
            .await?;

        for user_item in &confirmed {
            let Some(item) = item_index.get(user_item.public_item.as_str()) else {
                continue;
            };
            let last_active = activity.get(user_item.user.as_str()).copied().flatten();
            if !self.policy.admits(last_active, item.created) {
                continue;
            }
            let pair =
                MinutePair::contribution(user_item.progress, user_item.estimate_minutes);
            *snapshot
                .items
                .entry(item.id.clone())
                .or_default()
                .entry(user_item.user.clone())
                .or_default() += pair;
            *snapshot
                .subjects
                .entry(item.subject.clone())
                .or_default()
                .entry(user_item.user.clone())
                .or_default() += pair;
            *snapshot.overall.entry(user_item.user.clone()).or_default() += pair;
        }
        Ok(snapshot)
    }
}
