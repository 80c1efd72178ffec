//! Event vocabulary pushed over the real-time channel.

use crate::aggregation::MinutePair;
use crate::store::UserSummary;
use serde::{Deserialize, Serialize};

/// Coarse invalidation domain: which client-side mirror must be re-fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshDomain {
    /// The item list.
    Items,
    /// The shared progress snapshot.
    Share,
}

/// Incremental progress delta for one (item, user) cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressChange {
    pub organization: String,
    pub item: String,
    pub subject: String,
    pub user: String,
    pub new_progress: MinutePair,
}

/// Events delivered to connections, scoped to organization rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Connect handshake: server build/version tag.
    Info { version: String },
    /// Users that came online in a shared room.
    UsersJoined { users: Vec<String> },
    /// Users that went offline in a shared room.
    UsersLeft { users: Vec<String> },
    /// Structural change: all but the acting user should re-fetch the named
    /// domains rather than trust incremental diffs.
    Refresh {
        except: String,
        domains: Vec<RefreshDomain>,
    },
    /// Incremental aggregate delta.
    ProgressUpdated(ProgressChange),
    /// A member's display fields changed.
    UserUpdated { user: UserSummary },
}
