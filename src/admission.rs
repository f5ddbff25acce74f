//! Admission path: register a draft, enqueue it if it is new.
//!
//! Also provides [`CompleteRecord`], the processing function that marks a
//! record done with the item's result.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{Engine, Processor, WorkItem};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkRecord, Status, WorkId, WorkRecord};
use crate::store::{CreateOutcome, Store};
use crate::telemetry::metrics;

/// Joins the idempotent registry to the engine.
pub struct Admission {
    store: Arc<dyn Store>,
    engine: Arc<Engine>,
}

impl Admission {
    pub fn new(store: Arc<dyn Store>, engine: Arc<Engine>) -> Self {
        Self { store, engine }
    }

    /// Register a draft and enqueue it unless its key was already used.
    ///
    /// Only the caller that created the record enqueues it, so concurrent
    /// duplicates result in a single execution.
    ///
    /// Fails with [`Error::Stopped`] without touching the store once the
    /// engine has stopped accepting work.
    pub async fn submit(&self, draft: NewWorkRecord) -> Result<CreateOutcome> {
        if !self.engine.is_accepting() {
            return Err(Error::Stopped);
        }
        let work_type = draft.work_type().to_string();
        let outcome = self.store.create_or_get_by_key(draft).await?;

        match &outcome {
            CreateOutcome::Created(record) => {
                self.engine.enqueue(initial_item(record)).await?;
                info!(id = %record.id, work_type = %record.work_type, "work admitted");
            }
            CreateOutcome::Existing(record) => {
                debug!(id = %record.id, "duplicate submission, not enqueued");
            }
        }

        metrics::work_submitted().add(
            1,
            &[
                KeyValue::new("work_type", work_type),
                KeyValue::new(
                    "result",
                    if outcome.existed() { "existing" } else { "created" },
                ),
            ],
        );
        Ok(outcome)
    }

    pub async fn get(&self, id: WorkId) -> Result<WorkRecord> {
        self.store.get(id).await
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

/// The item enqueued for a freshly created record: the payload echoed back
/// with the admission time.
pub fn initial_item(record: &WorkRecord) -> WorkItem {
    let mut result = Map::new();
    result.insert("echo".to_string(), record.payload.clone());
    result.insert("processedAt".to_string(), json!(Utc::now()));
    WorkItem::new(record.id.to_string()).with_result(result)
}

/// Processor that marks the item's record done, storing its result.
///
/// A missing record or storage error fails the attempt and so goes through
/// the retry path.
pub struct CompleteRecord {
    store: Arc<dyn Store>,
}

impl CompleteRecord {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Processor for CompleteRecord {
    async fn process(
        &self,
        _cancel: &CancellationToken,
        item: &mut WorkItem,
    ) -> anyhow::Result<()> {
        let id: WorkId = item.id.parse()?;
        self.store
            .update_status(id, Status::Done, Some(Value::Object(item.result.clone())))
            .await?;
        Ok(())
    }
}
