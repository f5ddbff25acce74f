//! End-to-end admission: registry plus engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use workq::admission::{Admission, CompleteRecord};
use workq::engine::{Engine, from_fn};
use workq::model::work::{NewWorkRecord, Status};
use workq::store::{MemoryStore, Store};

fn memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submitted_record_is_processed_to_done() {
    let store = memory_store();
    let engine = Engine::builder()
        .workers(2)
        .start(CompleteRecord::new(Arc::clone(&store)));
    let admission = Admission::new(Arc::clone(&store), Arc::new(engine));

    let outcome = admission
        .submit(NewWorkRecord::new("echo").payload(json!({"msg": "hello"})))
        .await
        .unwrap();
    assert!(!outcome.existed());
    assert_eq!(outcome.record().status, Status::Queued);

    assert!(admission.engine().wait_idle(Duration::from_secs(2)).await);
    admission.engine().stop().await;

    let record = admission.get(outcome.record().id).await.unwrap();
    assert_eq!(record.status, Status::Done);
    let result = record.result.unwrap();
    assert_eq!(result["echo"], json!({"msg": "hello"}));
    assert!(result["processedAt"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_execute_once() {
    let executions = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&executions);
    let engine = Engine::builder().workers(4).start(from_fn(move |_c, _item| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }));
    let admission = Arc::new(Admission::new(memory_store(), Arc::new(engine)));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move {
                admission
                    .submit(NewWorkRecord::new("echo").idempotency_key("once"))
                    .await
                    .unwrap()
            })
        })
        .collect();
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().record().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    assert!(admission.engine().wait_idle(Duration::from_secs(2)).await);
    admission.engine().stop().await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(admission.engine().stats().processed, 1);
}

#[tokio::test]
async fn resubmitting_a_finished_key_does_not_enqueue() {
    let store = memory_store();
    let engine = Engine::builder()
        .workers(1)
        .start(CompleteRecord::new(Arc::clone(&store)));
    let admission = Admission::new(store, Arc::new(engine));

    let first = admission
        .submit(NewWorkRecord::new("echo").idempotency_key("k"))
        .await
        .unwrap();
    assert!(admission.engine().wait_idle(Duration::from_secs(1)).await);

    let again = admission
        .submit(NewWorkRecord::new("echo").idempotency_key("k"))
        .await
        .unwrap();
    assert!(again.existed());
    assert_eq!(again.record().id, first.record().id);
    assert_eq!(again.record().status, Status::Done);

    assert!(admission.engine().wait_idle(Duration::from_secs(1)).await);
    admission.engine().stop().await;
    assert_eq!(admission.engine().stats().processed, 1);
}

#[tokio::test]
async fn submit_after_stop_is_rejected_without_writing() {
    let store = memory_store();
    let engine = Engine::builder().start(from_fn(|_c, _item| Box::pin(async { Ok(()) })));
    let admission = Admission::new(Arc::clone(&store), Arc::new(engine));
    admission.engine().stop().await;

    let err = admission
        .submit(NewWorkRecord::new("echo").idempotency_key("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, workq::error::Error::Stopped));

    // The key was never claimed, so a later admission can still create it.
    let fresh = store
        .create_or_get_by_key(NewWorkRecord::new("echo").idempotency_key("late"))
        .await
        .unwrap();
    assert!(!fresh.existed());
}
