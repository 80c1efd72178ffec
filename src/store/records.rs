//! Record types for the five persisted collections.
//!
//! Field sets mirror the authoritative persistence schema. Membership lives on
//! the user record (`User::organizations`), not on the organization, so an
//! organization's member set is always derived with a query.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The five persisted collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Organizations,
    Subjects,
    PublicItems,
    UserItems,
    Users,
}

impl Collection {
    /// Tree name used by the sled adapter.
    pub fn tree_name(&self) -> &'static str {
        match self {
            Collection::Organizations => "organizations",
            Collection::Subjects => "subjects",
            Collection::PublicItems => "public_items",
            Collection::UserItems => "user_items",
            Collection::Users => "users",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tree_name())
    }
}

/// A persisted record: knows its collection and its id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn id(&self) -> &str;
}

/// Mint a fresh record id.
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Sharing scope of a public item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Range {
    /// Visible to the author only; no fellow items exist.
    #[default]
    Private,
    /// Shared with the organization; fellows start unconfirmed.
    Some,
    /// Shared with the organization; fellows are auto-confirmed.
    All,
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Range::Private => write!(f, "private"),
            Range::Some => write!(f, "some"),
            Range::All => write!(f, "all"),
        }
    }
}

/// A membership group owning shared items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub leader: String,
    #[serde(default)]
    pub managers: Vec<String>,
}

impl Organization {
    /// Leader and managers may act on any of the organization's items.
    pub fn is_authority(&self, user_id: &str) -> bool {
        self.leader == user_id || self.managers.iter().any(|m| m == user_id)
    }
}

impl Record for Organization {
    const COLLECTION: Collection = Collection::Organizations;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A category grouping public items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub abbr: String,
}

impl Record for Subject {
    const COLLECTION: Collection = Collection::Subjects;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A sharable task template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicItem {
    pub id: String,
    pub author: String,
    pub subject: String,
    pub description: String,
    pub estimate_minutes: f64,
    #[serde(default)]
    pub range: Range,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl Record for PublicItem {
    const COLLECTION: Collection = Collection::PublicItems;

    fn id(&self) -> &str {
        &self.id
    }
}

/// One user's tracking instance of a public item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserItem {
    pub id: String,
    pub user: String,
    pub public_item: String,
    pub estimate_minutes: f64,
    /// Completion fraction in [0, 1].
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub note: String,
}

impl Record for UserItem {
    const COLLECTION: Collection = Collection::UserItems;

    fn id(&self) -> &str {
        &self.id
    }
}

/// An account; carries its own organization memberships and activity stamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub goal: Option<DateTime<Utc>>,
    /// Item the user is currently working on, if any.
    #[serde(default)]
    pub working_on: Option<String>,
    /// When the user last checked in; feeds the aggregation staleness guard.
    #[serde(default)]
    pub working_on_since: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_member_of(&self, org_id: &str) -> bool {
        self.organizations.iter().any(|o| o == org_id)
    }
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Display projection of a user attached to progress snapshots, so clients can
/// render member lists without extra lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub avatar: String,
    #[serde(default)]
    pub working_on: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id.clone(),
            name: if user.name.is_empty() {
                user.username.clone()
            } else {
                user.name.clone()
            },
            avatar: user.avatar.clone(),
            working_on: user.working_on.clone(),
        }
    }
}
