//! Postgres store via SQLx.
//!
//! Dedup relies on a unique index over `idempotency_key`: concurrent inserts
//! for the same key serialize on the index, one wins, the rest fall through
//! to reading the winner's row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use uuid::Uuid;

use super::{CreateOutcome, Store};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkRecord, Status, WorkId, WorkRecord, validate_transition};

const SELECT_COLUMNS: &str =
    "SELECT id, work_type, payload, status, result, created_at, updated_at FROM work_records";

/// Store backed by a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<WorkRecord>> {
        let row: Option<WorkRecordRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE idempotency_key = $1"))
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        row.map(WorkRecordRow::try_into_record).transpose()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_or_get_by_key(&self, draft: NewWorkRecord) -> Result<CreateOutcome> {
        let record = WorkRecord::from_draft(&draft);

        let inserted = sqlx::query(
            "INSERT INTO work_records (id, work_type, payload, status, result, idempotency_key, created_at, updated_at)
             VALUES ($1, $2, $3, $4, NULL, $5, $6, $6)
             ON CONFLICT (idempotency_key) DO NOTHING",
        )
        .bind(record.id.0)
        .bind(&record.work_type)
        .bind(&record.payload)
        .bind(record.status.as_str())
        .bind(draft.key())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(CreateOutcome::Created(record));
        }

        // Conflict: another request owns this key. The conflicting row is
        // committed by the time ON CONFLICT resolves, so it is visible here.
        let key = draft.key().unwrap_or_default();
        let existing = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work record for key {key}")))?;
        debug!(key, id = %existing.id, "idempotency key hit");
        Ok(CreateOutcome::Existing(existing))
    }

    async fn get(&self, id: WorkId) -> Result<WorkRecord> {
        let row: Option<WorkRecordRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("work record {id}")))?
            .try_into_record()
    }

    async fn update_status(
        &self,
        id: WorkId,
        status: Status,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM work_records WHERE id = $1 FOR UPDATE")
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await?;
        let (current,) = current.ok_or_else(|| Error::NotFound(format!("work record {id}")))?;
        validate_transition(current.parse()?, status)?;

        sqlx::query(
            "UPDATE work_records SET status = $1, result = COALESCE($2, result), updated_at = $3
             WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkRecordRow {
    id: Uuid,
    work_type: String,
    payload: serde_json::Value,
    status: String,
    result: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WorkRecordRow {
    fn try_into_record(self) -> Result<WorkRecord> {
        Ok(WorkRecord {
            id: WorkId(self.id),
            work_type: self.work_type,
            payload: self.payload,
            status: self.status.parse()?,
            result: self.result,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
