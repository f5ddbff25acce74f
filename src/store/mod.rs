//! Work record storage: the idempotent registry.
//!
//! Every backend implements [`Store`]. The contract that matters is
//! [`Store::create_or_get_by_key`]: for a given non-empty idempotency key,
//! concurrent callers create at most one record and all observe its id.

pub mod memory;
pub mod postgres;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use crate::config::secrets::ExposeSecret;

use crate::config::{Config, StoreKind};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkRecord, Status, WorkId, WorkRecord};

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;
pub use self::redis::RedisStore;

/// What happened when a draft was registered.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new record was persisted.
    Created(WorkRecord),
    /// The idempotency key was already mapped; nothing was written.
    Existing(WorkRecord),
}

impl CreateOutcome {
    pub fn record(&self) -> &WorkRecord {
        match self {
            CreateOutcome::Created(record) | CreateOutcome::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> WorkRecord {
        match self {
            CreateOutcome::Created(record) | CreateOutcome::Existing(record) => record,
        }
    }

    pub fn existed(&self) -> bool {
        matches!(self, CreateOutcome::Existing(_))
    }
}

/// Capability set shared by all storage backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the record mapped to the draft's idempotency key, or create
    /// one. Lookup and insert happen in one exclusion domain.
    async fn create_or_get_by_key(&self, draft: NewWorkRecord) -> Result<CreateOutcome>;

    /// Fails with `Error::NotFound` if absent.
    async fn get(&self, id: WorkId) -> Result<WorkRecord>;

    /// Set the status, replacing the result when one is given.
    ///
    /// Fails with `Error::NotFound` for an unknown id and
    /// `Error::InvalidTransition` for a disallowed status change.
    async fn update_status(
        &self,
        id: WorkId,
        status: Status,
        result: Option<serde_json::Value>,
    ) -> Result<()>;
}

/// Open the backend selected by configuration. Postgres is migrated first.
pub async fn connect(config: &Config) -> Result<Arc<dyn Store>> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Redis => {
            let url = config
                .redis_url
                .as_ref()
                .ok_or_else(|| Error::Config("REDIS_URL is not set".to_string()))?;
            let store = RedisStore::connect(url.expose_secret(), &config.redis_prefix).await?;
            Ok(Arc::new(store))
        }
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_ref()
                .ok_or_else(|| Error::Config("DATABASE_URL is not set".to_string()))?;
            let store = PgStore::connect(url.expose_secret()).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
