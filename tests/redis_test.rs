use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use workq::error::Error;
use workq::model::work::{NewWorkRecord, Status, WorkId};
use workq::store::{RedisStore, Store};

/// Requires REDIS_URL env var or defaults to local dev. Each test uses its
/// own key prefix so runs do not collide.
async fn test_store() -> RedisStore {
    let url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisStore::connect(&url, format!("workq-test-{}", WorkId::new()))
        .await
        .unwrap()
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn create_get_and_dedup() {
    let store = test_store().await;

    let first = store
        .create_or_get_by_key(
            NewWorkRecord::new("echo")
                .payload(json!({"n": 1}))
                .idempotency_key("k"),
        )
        .await
        .unwrap();
    let second = store
        .create_or_get_by_key(NewWorkRecord::new("echo").idempotency_key("k"))
        .await
        .unwrap();

    assert!(second.existed());
    assert_eq!(first.record().id, second.record().id);
    let fetched = store.get(first.record().id).await.unwrap();
    assert_eq!(fetched.payload, json!({"n": 1}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires running Redis
async fn concurrent_creates_share_one_record() {
    let store = Arc::new(test_store().await);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .create_or_get_by_key(NewWorkRecord::new("echo").idempotency_key("race"))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    let mut created = 0;
    for task in tasks {
        let outcome = task.await.unwrap();
        created += usize::from(!outcome.existed());
        ids.insert(outcome.record().id);
    }
    assert_eq!(created, 1);
    assert_eq!(ids.len(), 1);

    // Losers cleaned up their records, so only the winner is readable.
    let winner = *ids.iter().next().unwrap();
    assert_eq!(store.get(winner).await.unwrap().status, Status::Queued);
}

#[tokio::test]
#[ignore] // Requires running Redis
async fn update_status_and_errors() {
    let store = test_store().await;
    let id = store
        .create_or_get_by_key(NewWorkRecord::new("echo"))
        .await
        .unwrap()
        .record()
        .id;

    store
        .update_status(id, Status::Done, Some(json!({"ok": true})))
        .await
        .unwrap();
    assert_eq!(store.get(id).await.unwrap().status, Status::Done);

    assert!(matches!(
        store.update_status(id, Status::Queued, None).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.get(WorkId::new()).await,
        Err(Error::NotFound(_))
    ));
}
