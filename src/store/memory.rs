//! In-process store. One lock guards both the records and the key index.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{CreateOutcome, Store};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkRecord, Status, WorkId, WorkRecord};

#[derive(Default)]
struct Tables {
    records: HashMap<WorkId, WorkRecord>,
    /// idempotency key -> record id
    keys: HashMap<String, WorkId>,
}

/// Store backed by process memory. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.tables().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_or_get_by_key(&self, draft: NewWorkRecord) -> Result<CreateOutcome> {
        let mut tables = self.tables();

        if let Some(key) = draft.key() {
            let existing = tables
                .keys
                .get(key)
                .and_then(|id| tables.records.get(id));
            if let Some(existing) = existing {
                debug!(key, id = %existing.id, "idempotency key hit");
                return Ok(CreateOutcome::Existing(existing.clone()));
            }
        }

        let record = WorkRecord::from_draft(&draft);
        tables.records.insert(record.id, record.clone());
        if let Some(key) = draft.key() {
            tables.keys.insert(key.to_string(), record.id);
        }
        Ok(CreateOutcome::Created(record))
    }

    async fn get(&self, id: WorkId) -> Result<WorkRecord> {
        self.tables()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("work record {id}")))
    }

    async fn update_status(
        &self,
        id: WorkId,
        status: Status,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut tables = self.tables();
        let record = tables
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("work record {id}")))?;
        record.apply_status(status, result)
    }
}
