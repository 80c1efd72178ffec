//! Node operation surface: error taxonomy, authorization rules, and the
//! post-mutation broadcasts.

mod common;

use chrono::Utc;
use common::Fixture;
use paceboard::store::{Filter, Record, StoreError, StoreResult};
use paceboard::{
    ItemUpdate, MinutePair, NewItem, NodeConfig, Organization, PaceboardError, PaceboardNode,
    PublicItem, Range, RealtimeChannel, RecordStore, RefreshDomain, ServerEvent, SledStore,
    Subject, User, UserItemUpdate,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn draft(range: Range, org: Option<&str>) -> NewItem {
    NewItem {
        subject: "s1".into(),
        description: "essay outline".into(),
        estimate_minutes: 45.0,
        range,
        organization: org.map(str::to_string),
        deadline: None,
    }
}

async fn seeded() -> Fixture {
    let fix = Fixture::new();
    fix.seed_user("u1", &["o1"]).await;
    fix.seed_user("u2", &["o1"]).await;
    fix.seed_user("outsider", &[]).await;
    fix.seed_organization("o1", "u1").await;
    fix.seed_subject("s1", "Writing").await;
    fix
}

#[tokio::test]
async fn unknown_actor_is_an_authentication_error() {
    let fix = seeded().await;
    let err = fix
        .node
        .get_progress("ghost", &["o1".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Authentication(_)));
    assert_eq!(err.status(), 401);
}

#[tokio::test]
async fn progress_for_a_foreign_organization_is_forbidden() {
    let fix = seeded().await;
    let err = fix
        .node
        .get_progress("outsider", &["o1".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Authorization(_)));
    assert_eq!(err.status(), 403);
}

#[tokio::test]
async fn missing_organization_is_not_found() {
    let fix = seeded().await;
    let err = fix
        .node
        .get_progress("u1", &["nowhere".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::NotFound(_)));
    assert_eq!(err.status(), 404);
}

#[tokio::test]
async fn malformed_input_is_rejected_before_the_core() {
    let fix = seeded().await;

    let err = fix
        .node
        .create_item("u1", NewItem { estimate_minutes: 0.0, ..draft(Range::Private, Some("o1")) })
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Validation(_)));

    // Shared scope without an organization is contradictory.
    let err = fix
        .node
        .create_item("u1", draft(Range::All, None))
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Validation(_)));

    let item = fix
        .node
        .create_item("u1", draft(Range::Private, Some("o1")))
        .await
        .unwrap();
    let own = fix.item_of(&item.id, "u1").await.unwrap();
    let err = fix
        .node
        .update_user_item(
            "u1",
            UserItemUpdate {
                user_item: own.id,
                progress: Some(1.5),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Validation(_)));
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn only_the_owner_may_touch_a_tracking_record() {
    let fix = seeded().await;
    let item = fix
        .node
        .create_item("u1", draft(Range::All, Some("o1")))
        .await
        .unwrap();
    let fellows_record = fix.item_of(&item.id, "u2").await.unwrap();

    let err = fix
        .node
        .update_user_item(
            "u1",
            UserItemUpdate {
                user_item: fellows_record.id,
                progress: Some(1.0),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Authorization(_)));
}

#[tokio::test]
async fn item_updates_require_author_or_organization_authority() {
    let fix = seeded().await;
    let item = fix
        .node
        .create_item("u2", draft(Range::Some, Some("o1")))
        .await
        .unwrap();

    // u1 leads o1, so the leader may edit another member's shared item.
    fix.node
        .update_item(
            "u1",
            ItemUpdate {
                item: item.id.clone(),
                description: Some("leader edit".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // A plain member who is not the author may not.
    fix.seed_user("u3", &["o1"]).await;
    let err = fix
        .node
        .update_item(
            "u3",
            ItemUpdate {
                item: item.id.clone(),
                description: Some("nope".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::Authorization(_)));
}

#[tokio::test]
async fn progress_mutation_broadcasts_the_durable_tuple() {
    let fix = seeded().await;
    let item = fix
        .node
        .create_item("u1", draft(Range::All, Some("o1")))
        .await
        .unwrap();

    let mut listener = fix.channel.connect("u2", &["o1".to_string()]).unwrap();
    while listener.try_recv().is_some() {}

    let own = fix.item_of(&item.id, "u1").await.unwrap();
    fix.node
        .update_user_item(
            "u1",
            UserItemUpdate {
                user_item: own.id.clone(),
                progress: Some(0.5),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The broadcast arrives only after the write is durable, so the stored
    // record already matches the event's tuple.
    match listener.try_recv() {
        Some(ServerEvent::ProgressUpdated(change)) => {
            assert_eq!(change.organization, "o1");
            assert_eq!(change.item, item.id);
            assert_eq!(change.subject, "s1");
            assert_eq!(change.user, "u1");
            assert_eq!(change.new_progress, MinutePair(22.5, 45.0));
            let stored = fix.item_of(&item.id, "u1").await.unwrap();
            assert_eq!(
                MinutePair::contribution(stored.progress, stored.estimate_minutes),
                change.new_progress
            );
        }
        other => panic!("expected a progress delta, got {:?}", other),
    }
}

#[tokio::test]
async fn structural_changes_emit_refresh_to_everyone_but_the_actor() {
    let fix = seeded().await;
    let mut actor_conn = fix.channel.connect("u1", &["o1".to_string()]).unwrap();
    let mut other_conn = fix.channel.connect("u2", &["o1".to_string()]).unwrap();
    for conn in [&mut actor_conn, &mut other_conn] {
        while conn.try_recv().is_some() {}
    }

    fix.node
        .create_item("u1", draft(Range::All, Some("o1")))
        .await
        .unwrap();

    assert_eq!(actor_conn.try_recv(), None);
    match other_conn.try_recv() {
        Some(ServerEvent::Refresh { except, domains }) => {
            assert_eq!(except, "u1");
            assert_eq!(domains, vec![RefreshDomain::Items, RefreshDomain::Share]);
        }
        other => panic!("expected a refresh, got {:?}", other),
    }
}

#[tokio::test]
async fn working_on_checkin_updates_stamps_and_notifies_rooms() {
    let fix = seeded().await;
    let item = fix
        .node
        .create_item("u1", draft(Range::All, Some("o1")))
        .await
        .unwrap();

    let mut listener = fix.channel.connect("u2", &["o1".to_string()]).unwrap();
    while listener.try_recv().is_some() {}

    fix.node
        .update_working_on("u1", Some(item.id.clone()))
        .await
        .unwrap();

    let user: User = fix.store.get_required("u1").await.unwrap();
    assert_eq!(user.working_on.as_deref(), Some(item.id.as_str()));
    assert!(user.working_on_since.is_some());

    match listener.try_recv() {
        Some(ServerEvent::UserUpdated { user }) => {
            assert_eq!(user.id, "u1");
            assert_eq!(user.working_on.as_deref(), Some(item.id.as_str()));
        }
        other => panic!("expected a user update, got {:?}", other),
    }

    // Checking in against a missing item is a not-found error.
    let err = fix
        .node
        .update_working_on("u1", Some("ghost".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaceboardError::NotFound(_)));
}

/// Store wrapper whose queries can be switched off, leaving point reads and
/// writes intact.
struct FlakyStore {
    inner: SledStore,
    fail_queries: AtomicBool,
}

#[async_trait::async_trait]
impl RecordStore for FlakyStore {
    async fn create<T: Record>(&self, record: &T) -> StoreResult<()> {
        self.inner.create(record).await
    }

    async fn get<T: Record>(&self, id: &str) -> StoreResult<Option<T>> {
        self.inner.get(id).await
    }

    async fn update<T: Record>(&self, record: &T) -> StoreResult<()> {
        self.inner.update(record).await
    }

    async fn delete<T: Record>(&self, id: &str) -> StoreResult<bool> {
        self.inner.delete::<T>(id).await
    }

    async fn query<T: Record>(&self, filter: &Filter) -> StoreResult<Vec<T>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("store offline".into()));
        }
        self.inner.query(filter).await
    }
}

#[tokio::test]
async fn reconcile_failure_never_revokes_the_durable_item_write() {
    let store = Arc::new(FlakyStore {
        inner: SledStore::temporary().unwrap(),
        fail_queries: AtomicBool::new(false),
    });
    let channel = RealtimeChannel::init("test-build", 64);
    let node = PaceboardNode::with_store(
        Arc::clone(&store),
        channel,
        NodeConfig::new(PathBuf::from("unused")),
    );
    store
        .create(&User {
            id: "u1".into(),
            username: "u1".into(),
            name: String::new(),
            avatar: String::new(),
            organizations: vec!["o1".into()],
            goal: None,
            working_on: None,
            working_on_since: Some(Utc::now()),
        })
        .await
        .unwrap();
    store
        .create(&Organization {
            id: "o1".into(),
            name: "org o1".into(),
            leader: "u1".into(),
            managers: Vec::new(),
        })
        .await
        .unwrap();
    store
        .create(&Subject {
            id: "s1".into(),
            name: "Writing".into(),
            abbr: "W".into(),
        })
        .await
        .unwrap();
    let item = node
        .create_item("u1", draft(Range::All, Some("o1")))
        .await
        .unwrap();

    // Fan-out cannot even list the fellows now, but the item write is durable
    // and the mutation still reports success.
    store.fail_queries.store(true, Ordering::SeqCst);
    let updated = node
        .update_item(
            "u1",
            ItemUpdate {
                item: item.id.clone(),
                range: Some(Range::Private),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated);
    store.fail_queries.store(false, Ordering::SeqCst);

    let stored: PublicItem = store.get_required(&item.id).await.unwrap();
    assert_eq!(stored.range, Range::Private);
}
