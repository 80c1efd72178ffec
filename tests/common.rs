//! Shared fixtures for integration tests: a node over a temporary sled store
//! plus seeding helpers for the five record collections.

#![allow(dead_code)]

use chrono::Utc;
use paceboard::store::Filter;
use paceboard::{
    NodeConfig, Organization, PaceboardNode, RealtimeChannel, RecordStore, SledStore, Subject,
    User, UserItem,
};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Fixture {
    pub node: PaceboardNode<SledStore>,
    pub store: Arc<SledStore>,
    pub channel: RealtimeChannel,
}

impl Fixture {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(SledStore::temporary().expect("temporary store"));
        let channel = RealtimeChannel::init("test-build", 64);
        let node = PaceboardNode::with_store(
            Arc::clone(&store),
            channel.clone(),
            NodeConfig::new(PathBuf::from("unused")),
        );
        Self {
            node,
            store,
            channel,
        }
    }

    /// Seed a user with a fresh check-in stamp so the staleness guard admits
    /// their contributions to items created from now on.
    pub async fn seed_user(&self, id: &str, orgs: &[&str]) -> User {
        let user = User {
            id: id.to_string(),
            username: id.to_string(),
            name: String::new(),
            avatar: String::new(),
            organizations: orgs.iter().map(|o| o.to_string()).collect(),
            goal: None,
            working_on: None,
            working_on_since: Some(Utc::now()),
        };
        self.store.create(&user).await.expect("seed user");
        user
    }

    pub async fn seed_organization(&self, id: &str, leader: &str) -> Organization {
        let org = Organization {
            id: id.to_string(),
            name: format!("org {}", id),
            leader: leader.to_string(),
            managers: Vec::new(),
        };
        self.store.create(&org).await.expect("seed organization");
        org
    }

    pub async fn seed_subject(&self, id: &str, name: &str) -> Subject {
        let subject = Subject {
            id: id.to_string(),
            name: name.to_string(),
            abbr: name[..1].to_string(),
        };
        self.store.create(&subject).await.expect("seed subject");
        subject
    }

    /// All tracking records referencing an item.
    pub async fn items_for(&self, item_id: &str) -> Vec<UserItem> {
        self.store
            .query::<UserItem>(&Filter::eq("public_item", item_id.to_string()))
            .await
            .expect("query user items")
    }

    /// The tracking record of one (item, user) pair, if any.
    pub async fn item_of(&self, item_id: &str, user_id: &str) -> Option<UserItem> {
        self.items_for(item_id)
            .await
            .into_iter()
            .find(|ui| ui.user == user_id)
    }
}
