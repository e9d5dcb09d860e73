//! End-to-end scenarios through the service loop.
//!
//! Most tests run on tokio's paused clock, so the idle window and the
//! max-wait bound elapse instantly and deterministically.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use roster_bridge::core::{
    ContactFacet, ContactHandle, ContactMask, Presence, PresenceState, SubscriptionState,
};
use roster_bridge::store::{ContactStore, MemoryStore, SqliteStore};
use roster_bridge::sync::{ErrorCode, MemoryFetcher, NoFetch, SyncError};
use roster_bridge::{RosterBridge, RosterBridgeHandle, ServiceConfig, ServiceError, SyncConfig};
use roster_bridge_testkit::{RecordingStore, TestFixture};
use tokio::task::JoinHandle;

type Store = RecordingStore<Arc<MemoryStore>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn start(fixture: &TestFixture) -> (Arc<Store>, RosterBridgeHandle, JoinHandle<()>) {
    init_tracing();
    let store = Arc::new(RecordingStore::new(Arc::clone(&fixture.store)));
    let (bridge, task) = RosterBridge::spawn(Arc::clone(&store), SyncConfig::default(), Arc::new(NoFetch))
        .await
        .unwrap();
    (store, bridge, task)
}

/// Add the fixture account and the given contacts, then flush.
async fn populate(fixture: &TestFixture, bridge: &RosterBridgeHandle, handles: &[&str]) {
    bridge.account_added(fixture.account.clone()).await.unwrap();
    for handle in handles {
        bridge.contact_added(fixture.contact(handle)).await.unwrap();
    }
    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.saved, handles.len() + 1);
}

#[tokio::test(start_paused = true)]
async fn test_presence_then_alias_coalesce_into_one_save() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["carol@example.org"]).await;
    store.clear();

    let mut carol = fixture.contact("carol@example.org");
    carol.presence = Presence::new(PresenceState::Away);
    bridge
        .contact_updated(carol.clone(), ContactMask::of(ContactFacet::Presence))
        .await
        .unwrap();
    carol.alias = "Carol".into();
    bridge
        .contact_updated(carol, ContactMask::of(ContactFacet::Alias))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let saves = store.saves();
    assert_eq!(saves.len(), 1, "one flush cycle");
    assert_eq!(saves[0].len(), 1, "one save for carol");
    let record = &saves[0][0].accounts[0];
    assert_eq!(record.presence.state, PresenceState::Away);
    assert_eq!(record.alias, "Carol");
    assert!(store.removes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_removed_account_deletes_contact_with_pending_change() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["carol@example.org"]).await;
    let carol_id = fixture
        .store
        .find_by_key(&fixture.key("carol@example.org"))
        .await
        .unwrap()
        .and_then(|c| c.id)
        .unwrap();
    store.clear();

    let mut carol = fixture.contact("carol@example.org");
    carol.alias = "Carol".into();
    bridge
        .contact_updated(carol, ContactMask::of(ContactFacet::Alias))
        .await
        .unwrap();
    bridge.account_removed(fixture.account.id.clone()).await.unwrap();

    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(store.removes(), vec![vec![carol_id]]);
    for batch in store.saves() {
        assert!(batch.iter().all(|c| c.is_self), "carol must not be saved");
    }

    let me = fixture.store.self_contact().await.unwrap().unwrap();
    assert!(!me.has_account(&fixture.account.id));
    assert!(fixture.store.get_contact(carol_id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_link_request_without_local_id_creates_one_contact_each() {
    let fixture = TestFixture::new();
    let (_store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &[]).await;

    bridge
        .create_account_contacts(
            fixture.account.id.clone(),
            vec![ContactHandle::new("h1@example.org"), ContactHandle::new("h2@example.org")],
            None,
        )
        .await
        .unwrap();
    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.saved, 2);

    let contacts: Vec<_> = fixture
        .store
        .snapshot()
        .into_iter()
        .filter(|c| !c.is_self)
        .collect();
    assert_eq!(contacts.len(), 2);
    for contact in &contacts {
        assert_eq!(contact.accounts.len(), 1);
        assert_eq!(contact.accounts[0].key.account, fixture.account.id);
    }
    assert_ne!(contacts[0].id, contacts[1].id);
}

#[tokio::test(start_paused = true)]
async fn test_link_request_for_unknown_account_is_rejected() {
    let fixture = TestFixture::new();
    let (_store, bridge, _task) = start(&fixture).await;

    let err = bridge
        .create_account_contacts("nope".into(), vec![ContactHandle::new("h1@example.org")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Sync(SyncError::UnknownAccount(_))));
}

#[tokio::test(start_paused = true)]
async fn test_roster_delta_replaces_pending_update_with_delete() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["h4@example.org"]).await;
    let h4_id = fixture
        .store
        .find_by_key(&fixture.key("h4@example.org"))
        .await
        .unwrap()
        .and_then(|c| c.id)
        .unwrap();
    store.clear();

    let mut h4 = fixture.contact("h4@example.org");
    h4.alias = "Four".into();
    bridge
        .contact_updated(h4, ContactMask::of(ContactFacet::Alias))
        .await
        .unwrap();
    bridge
        .roster_delta(
            fixture.account.id.clone(),
            vec![fixture.contact("h3@example.org")],
            vec![ContactHandle::new("h4@example.org")],
        )
        .await
        .unwrap();

    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.saved, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(store.removes(), vec![vec![h4_id]]);

    let created = store.saves().concat();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].accounts[0].key, fixture.key("h3@example.org"));
}

#[tokio::test(start_paused = true)]
async fn test_full_roster_snapshot_removes_missing_contacts() {
    let fixture = TestFixture::new();
    let (_store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["a@example.org", "b@example.org"]).await;

    bridge
        .roster_snapshot(
            fixture.account.id.clone(),
            vec![fixture.contact("b@example.org"), fixture.contact("c@example.org")],
        )
        .await
        .unwrap();
    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.removed, 1);

    let store = &fixture.store;
    assert!(store.find_by_key(&fixture.key("a@example.org")).await.unwrap().is_none());
    assert!(store.find_by_key(&fixture.key("b@example.org")).await.unwrap().is_some());
    assert!(store.find_by_key(&fixture.key("c@example.org")).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_account_and_roster_with_own_handle_in_first_window() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    let own = fixture.account.self_handle.as_str().to_string();

    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .roster_snapshot(
            fixture.account.id.clone(),
            vec![fixture.contact(&own), fixture.contact("bob@example.org")],
        )
        .await
        .unwrap();

    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.saved, 2);
    assert_eq!(store.saves().len(), 2, "self contact, then bob");

    let holder = fixture.store.find_by_key(&fixture.key(&own)).await.unwrap().unwrap();
    assert!(holder.is_self);
    assert!(fixture
        .store
        .find_by_key(&fixture.key("bob@example.org"))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_account_removed_and_readded_in_one_window() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["carol@example.org"]).await;
    store.clear();

    bridge.account_removed(fixture.account.id.clone()).await.unwrap();
    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .roster_snapshot(
            fixture.account.id.clone(),
            vec![fixture.contact("carol@example.org"), fixture.contact("dave@example.org")],
        )
        .await
        .unwrap();

    // The removal wins this cycle.
    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.removed, 1);
    let me = fixture.store.self_contact().await.unwrap().unwrap();
    assert!(!me.has_account(&fixture.account.id));

    // The re-add and its roster land in the next one.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let me = fixture.store.self_contact().await.unwrap().unwrap();
    assert!(me.has_account(&fixture.account.id));
    for handle in ["carol@example.org", "dave@example.org"] {
        assert!(fixture.store.find_by_key(&fixture.key(handle)).await.unwrap().is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_bounds_a_continuous_stream() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["busy@example.org"]).await;
    store.clear();

    let states = [
        PresenceState::Away,
        PresenceState::Busy,
        PresenceState::Available,
        PresenceState::Away,
        PresenceState::Busy,
    ];
    for (i, state) in states.into_iter().enumerate() {
        let mut busy = fixture.contact("busy@example.org");
        busy.presence = Presence::new(state);
        bridge
            .contact_updated(busy, ContactMask::of(ContactFacet::Presence))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        if i < 4 {
            assert!(store.saves().is_empty(), "no flush while events keep arriving");
        }
    }

    // 500ms after the first event, while the idle window keeps restarting.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let saves = store.saves();
    assert_eq!(saves.len(), 1, "exactly one flush at the max-wait bound");
    assert_eq!(saves[0].len(), 1);
    assert_eq!(saves[0][0].accounts[0].presence.state, PresenceState::Busy);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.saves().len(), 1, "nothing left to flush");
}

#[tokio::test(start_paused = true)]
async fn test_failed_commit_signals_once_and_is_not_retried() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;
    let mut errors = bridge.subscribe_errors();

    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .contact_added(fixture.contact("lost@example.org"))
        .await
        .unwrap();
    store.fail_next_writes(1);

    let err = bridge.flush_now().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);

    let signal = errors.recv().await.unwrap();
    assert_eq!(signal.code, ErrorCode::StoreUnavailable.as_u16());
    assert!(signal.message.contains("injected"));

    let report = bridge.flush_now().await.unwrap();
    assert!(report.is_empty());
    assert!(errors.try_recv().is_err());
    assert!(fixture.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_contact_batch_keeps_earlier_self_save() {
    let fixture = TestFixture::new();
    let (store, bridge, _task) = start(&fixture).await;

    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .contact_added(fixture.contact("lost@example.org"))
        .await
        .unwrap();
    store.fail_writes_after(1, 1);

    let err = bridge.flush_now().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StoreUnavailable);

    // Batches commit one by one; the self contact went in before the failure.
    let me = fixture.store.self_contact().await.unwrap().unwrap();
    assert!(me.has_account(&fixture.account.id));
    assert!(fixture
        .store
        .find_by_key(&fixture.key("lost@example.org"))
        .await
        .unwrap()
        .is_none());
    assert!(bridge.flush_now().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_fails_startup() {
    let fixture = TestFixture::new();
    let store = Arc::new(RecordingStore::new(Arc::clone(&fixture.store)));
    store.set_unavailable(true);

    let err = RosterBridge::spawn(store, SyncConfig::default(), Arc::new(NoFetch))
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), ErrorCode::Configuration);
}

#[tokio::test(start_paused = true)]
async fn test_avatar_fetched_out_of_band() {
    init_tracing();
    let fixture = TestFixture::new();
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher
        .insert("https://avatars.example.org/dan.png", Bytes::from_static(b"png"))
        .await;
    let (bridge, _task) = RosterBridge::spawn(Arc::clone(&fixture.store), SyncConfig::default(), fetcher)
        .await
        .unwrap();

    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .contact_added(fixture.contact_with_avatar(
            "dan@example.org",
            "t1",
            "https://avatars.example.org/dan.png",
        ))
        .await
        .unwrap();
    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.avatar_requests.len(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let dan = fixture
        .store
        .find_by_key(&fixture.key("dan@example.org"))
        .await
        .unwrap()
        .unwrap();
    let avatar = dan.accounts[0].avatar.as_ref().unwrap();
    assert_eq!(avatar.token, "t1");
    assert_eq!(avatar.data.as_deref(), Some(&b"png"[..]));
}

#[tokio::test(start_paused = true)]
async fn test_remote_removal_deletes_contact() {
    let fixture = TestFixture::new();
    let (_store, bridge, _task) = start(&fixture).await;
    populate(&fixture, &bridge, &["gone@example.org"]).await;

    let mut gone = fixture.contact("gone@example.org");
    gone.subscribe = SubscriptionState::RemovedRemotely;
    bridge
        .contact_updated(gone, ContactMask::of(ContactFacet::Subscription))
        .await
        .unwrap();

    let report = bridge.flush_now().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(fixture
        .store
        .find_by_key(&fixture.key("gone@example.org"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_and_stops() {
    let fixture = TestFixture::new();
    let (_store, bridge, task) = start(&fixture).await;

    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .contact_added(fixture.contact("last@example.org"))
        .await
        .unwrap();

    let report = bridge.shutdown().await.unwrap();
    assert_eq!(report.saved, 2);
    task.await.unwrap();

    let err = bridge.flush_now().await.unwrap_err();
    assert!(matches!(err, ServiceError::Stopped));
}

#[tokio::test]
async fn test_sqlite_roundtrip_through_service() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        database_path: dir.path().join("nested").join("contacts.db"),
        ..ServiceConfig::default()
    };
    let fixture = TestFixture::new();

    let (bridge, task) = RosterBridge::open(config.clone(), Arc::new(NoFetch))
        .await
        .unwrap();
    bridge.account_added(fixture.account.clone()).await.unwrap();
    bridge
        .contact_added(fixture.contact("erin@example.org"))
        .await
        .unwrap();
    bridge.shutdown().await.unwrap();
    task.await.unwrap();

    let store = SqliteStore::open(&config.database_path).unwrap();
    let erin = store
        .find_by_key(&fixture.key("erin@example.org"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(erin.accounts[0].alias, "erin@example.org");
    assert!(store.self_contact().await.unwrap().is_some());
}
