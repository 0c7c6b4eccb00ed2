//! Postgres store integration tests.
//!
//! These exercise the real compare-and-swap SQL against a live database and
//! are ignored by default. To run them, start the docker container from
//! `Config::default_for_test`, apply migrations, then:
//! `cargo test -p wab-server --test pg_store_test -- --ignored`

use std::sync::Arc;

use uuid::Uuid;
use wab_server::config::Config;
use wab_server::db::{self, DebitOutcome, EventSighting, EventStatus, PgStore, Store};
use wab_server::quota::WindowPolicy;

async fn pg_store() -> Arc<PgStore> {
    let config = Config::default_for_test();
    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to test DB");
    Arc::new(PgStore::new(pool))
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn concurrent_debits_serialize_in_postgres() {
    let store = pg_store().await;
    let tenant = Uuid::now_v7();
    let window = WindowPolicy::CalendarMonth.window_at(chrono::Utc::now());

    let mut handles = Vec::new();
    for _ in 0..100 {
        let store = Arc::clone(&store);
        let window = window;
        handles.push(tokio::spawn(async move {
            store.debit_quota(tenant, &window, 10, 1).await
        }));
    }

    let mut debited = 0;
    let mut exceeded = 0;
    for handle in handles {
        match handle.await.expect("task panicked").expect("debit failed") {
            DebitOutcome::Debited { .. } => debited += 1,
            DebitOutcome::Exceeded { .. } => exceeded += 1,
        }
    }

    assert_eq!(debited, 10);
    assert_eq!(exceeded, 90);

    let status = store
        .read_quota(tenant, &window, 10)
        .await
        .expect("read failed");
    assert_eq!(status.consumed, 10);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore]
async fn concurrent_first_sightings_collapse_to_one() {
    let store = pg_store().await;
    let event_id = format!("test-event-{}", Uuid::now_v7());

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = Arc::clone(&store);
        let event_id = event_id.clone();
        handles.push(tokio::spawn(async move {
            store.insert_event_if_new(&event_id, "hash").await
        }));
    }

    let mut new = 0;
    for handle in handles {
        match handle.await.expect("task panicked").expect("sighting failed") {
            EventSighting::New => new += 1,
            EventSighting::Duplicate(_) => {}
        }
    }

    assert_eq!(new, 1, "exactly one first sighting");

    store
        .set_event_status(&event_id, EventStatus::Processed, None)
        .await
        .expect("status update failed");
    let record = store
        .get_event(&event_id)
        .await
        .expect("read failed")
        .expect("record exists");
    assert_eq!(record.processing_status, EventStatus::Processed);
    assert!(record.processed_at.is_some());
}

#[tokio::test]
#[ignore]
async fn oauth_state_claim_is_single_use() {
    let store = pg_store().await;
    let state = format!("test-state-{}", Uuid::now_v7());
    let now = chrono::Utc::now();

    store
        .put_oauth_state(&wab_server::db::OAuthStateRecord {
            state: state.clone(),
            tenant_id: Uuid::now_v7(),
            expires_at: now + chrono::Duration::seconds(600),
            created_at: now,
        })
        .await
        .expect("put failed");

    let first = store.claim_oauth_state(&state).await.expect("claim failed");
    assert!(first.is_some());

    let second = store.claim_oauth_state(&state).await.expect("claim failed");
    assert!(second.is_none());
}
