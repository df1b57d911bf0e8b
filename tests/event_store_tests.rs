use accounts_es::domain::account::ProfileKind;
use accounts_es::domain::events::{AccountCreated, AccountEvent, UserAuthenticated};
use accounts_es::infrastructure::event_store::{EventStoreError, EventStoreTrait, PgEventStore};
use uuid::Uuid;

mod common;

fn created_event(aggregate_id: Uuid, email: &str) -> AccountEvent {
    AccountEvent::AccountCreated(AccountCreated {
        aggregate_id,
        name: "Ana".to_string(),
        password_hash: "$argon2id$stub".to_string(),
        email: email.to_string(),
        profile: ProfileKind::Common,
        active: true,
    })
}

fn login_event(aggregate_id: Uuid) -> AccountEvent {
    AccountEvent::UserAuthenticated(UserAuthenticated {
        aggregate_id,
        name: "Ana".to_string(),
        ip: "10.0.0.1".to_string(),
        device: "cli".to_string(),
    })
}

#[tokio::test]
async fn append_and_replay_keeps_order() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "ana@x.com"), 0, "corr-1")
        .await
        .unwrap();
    store
        .append(aggregate_id, &login_event(aggregate_id), 1, "corr-2")
        .await
        .unwrap();

    let events = store.get_events(aggregate_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type(), "UserCreated");
    assert_eq!(events[1].event_type(), "UserLogin");
    assert_eq!(store.current_version(aggregate_id).await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_aggregate_replays_empty() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool);

    let events = store.get_events(Uuid::new_v4()).await.unwrap();
    assert!(events.is_empty());
    assert_eq!(store.current_version(Uuid::new_v4()).await.unwrap(), 0);
}

#[tokio::test]
async fn stale_expected_version_yields_one_success_one_conflict() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "bob@x.com"), 0, "corr-1")
        .await
        .unwrap();

    // Re-using the already consumed expected version must conflict.
    let err = store
        .append(aggregate_id, &login_event(aggregate_id), 0, "corr-2")
        .await
        .unwrap_err();
    match err {
        EventStoreError::ConcurrencyConflict {
            expected, actual, ..
        } => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 1);
        }
        other => panic!("expected concurrency conflict, got {other:?}"),
    }

    // A fresh read of the current version succeeds.
    let version = store.current_version(aggregate_id).await.unwrap();
    store
        .append(aggregate_id, &login_event(aggregate_id), version, "corr-3")
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_appends_at_same_version_admit_exactly_one() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "carol@x.com"), 0, "corr-0")
        .await
        .unwrap();

    let event_a = login_event(aggregate_id);
    let event_b = login_event(aggregate_id);
    let (first, second) = tokio::join!(
        store.append(aggregate_id, &event_a, 1, "corr-a"),
        store.append(aggregate_id, &event_b, 1, "corr-b"),
    );

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one writer may win: {first:?} / {second:?}");
    for result in [first, second] {
        if let Err(err) = result {
            assert!(matches!(err, EventStoreError::ConcurrencyConflict { .. }));
        }
    }
    assert_eq!(store.current_version(aggregate_id).await.unwrap(), 2);
}

#[tokio::test]
async fn stored_versions_are_dense_and_ascending() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool.clone());
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "dave@x.com"), 0, "corr-0")
        .await
        .unwrap();
    for i in 1..5 {
        let version = store.current_version(aggregate_id).await.unwrap();
        store
            .append(
                aggregate_id,
                &login_event(aggregate_id),
                version,
                &format!("corr-{i}"),
            )
            .await
            .unwrap();
    }

    let versions: Vec<i64> = sqlx::query_scalar(
        "SELECT version FROM events WHERE aggregate_id = $1 ORDER BY version ASC",
    )
    .bind(aggregate_id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(versions, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn append_enqueues_a_pending_outbox_row() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool.clone());
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "eve@x.com"), 0, "corr-42")
        .await
        .unwrap();

    let rows: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT event_type, correlation_id, status FROM event_outbox WHERE aggregate_id = $1",
    )
    .bind(aggregate_id)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "UserCreated");
    assert_eq!(rows[0].1, "corr-42");
    assert_eq!(rows[0].2, "PENDING");
}

#[tokio::test]
async fn conflicting_append_leaves_no_outbox_row() {
    let Some(pool) = common::try_setup_test_db().await else {
        return;
    };
    let store = PgEventStore::new(pool.clone());
    let aggregate_id = Uuid::new_v4();

    store
        .append(aggregate_id, &created_event(aggregate_id, "finn@x.com"), 0, "corr-1")
        .await
        .unwrap();
    let _ = store
        .append(aggregate_id, &login_event(aggregate_id), 0, "corr-2")
        .await
        .unwrap_err();

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(count, 1, "only the committed append may enqueue publication");
}
