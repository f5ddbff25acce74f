//! Redis store: records as JSON strings, keys mapped with `SET NX`.
//!
//! Layout under a configurable prefix:
//! - `{prefix}:work:{id}`: the record as JSON
//! - `{prefix}:idem:{key}`: the id owning an idempotency key
//!
//! A new record is written before its key is claimed. Whoever claims the
//! key first wins; losers delete their unreferenced record and return the
//! winner's, which is already readable because it was written before the
//! claim.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{CreateOutcome, Store};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkRecord, Status, WorkId, WorkRecord};

/// Store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to Redis (e.g. "redis://localhost:6379").
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn record_key(&self, id: WorkId) -> String {
        format!("{}:work:{id}", self.prefix)
    }

    fn idem_key(&self, key: &str) -> String {
        format!("{}:idem:{key}", self.prefix)
    }

    async fn load(&self, id: WorkId) -> Result<Option<WorkRecord>> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(self.record_key(id)).await?;
        data.map(|s| serde_json::from_str(&s).map_err(Error::from))
            .transpose()
    }

    async fn save(&self, record: &WorkRecord) -> Result<()> {
        let mut conn = self.conn.clone();
        let data = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(self.record_key(record.id), data).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn create_or_get_by_key(&self, draft: NewWorkRecord) -> Result<CreateOutcome> {
        let mut conn = self.conn.clone();

        if let Some(key) = draft.key() {
            let owner: Option<String> = conn.get(self.idem_key(key)).await?;
            if let Some(owner) = owner {
                let id: WorkId = owner.parse()?;
                if let Some(existing) = self.load(id).await? {
                    debug!(key, %id, "idempotency key hit");
                    return Ok(CreateOutcome::Existing(existing));
                }
            }
        }

        let record = WorkRecord::from_draft(&draft);
        self.save(&record).await?;

        let Some(key) = draft.key() else {
            return Ok(CreateOutcome::Created(record));
        };

        let claimed: bool = conn
            .set_nx(self.idem_key(key), record.id.to_string())
            .await?;
        if claimed {
            return Ok(CreateOutcome::Created(record));
        }

        // Lost the race: discard our copy and return the winner's.
        conn.del::<_, ()>(self.record_key(record.id)).await?;
        let owner: Option<String> = conn.get(self.idem_key(key)).await?;
        let owner = owner.ok_or_else(|| Error::NotFound(format!("work record for key {key}")))?;
        let id: WorkId = owner.parse()?;
        let existing = self.load(id).await?.ok_or_else(|| {
            warn!(key, %id, "idempotency key points at a missing record");
            Error::NotFound(format!("work record {id}"))
        })?;
        debug!(key, %id, "idempotency key claimed concurrently");
        Ok(CreateOutcome::Existing(existing))
    }

    async fn get(&self, id: WorkId) -> Result<WorkRecord> {
        self.load(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work record {id}")))
    }

    /// Read-modify-write. Not atomic against a concurrent update of the same
    /// record; only the worker holding the item updates it.
    async fn update_status(
        &self,
        id: WorkId,
        status: Status,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut record = self.get(id).await?;
        record.apply_status(status, result)?;
        self.save(&record).await
    }
}
