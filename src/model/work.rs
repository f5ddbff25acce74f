//! Work record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Record
// ---------------------------------------------------------------------------

/// A persisted unit of work, created once per idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRecord {
    /// Assigned by the store on first creation. Never regenerated.
    pub id: WorkId,

    /// What kind of work this is (e.g., "echo"). Opaque to the engine.
    #[serde(rename = "type")]
    pub work_type: String,

    /// Arbitrary parameters supplied by the client.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,

    pub status: Status,

    /// Output written by the processing function on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkRecord {
    /// Materialize a draft with a fresh identity and timestamps.
    pub(crate) fn from_draft(draft: &NewWorkRecord) -> Self {
        let now = Utc::now();
        Self {
            id: WorkId::new(),
            work_type: draft.work_type.clone(),
            payload: draft.payload.clone(),
            status: Status::Queued,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status update in place, validating the transition.
    ///
    /// `result` replaces the stored result only when present.
    pub(crate) fn apply_status(
        &mut self,
        status: Status,
        result: Option<serde_json::Value>,
    ) -> Result<()> {
        validate_transition(self.status, status)?;
        self.status = status;
        if result.is_some() {
            self.result = result;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Newtype for work record IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(WorkId)
            .map_err(|_| Error::NotFound(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work record.
///
/// There is no failed status: a dead-lettered item leaves its record
/// `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Admitted, waiting for (or undergoing) processing.
    Queued,
    /// Processed successfully. Terminal.
    Done,
}

impl Status {
    /// Can transition from self to `to`?
    ///
    /// Same-status updates are accepted; a redelivered item may complete twice.
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!((self, to), (Queued, Queued) | (Queued, Done) | (Done, Done))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Done => "done",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Status::Queued),
            "done" => Ok(Status::Done),
            other => Err(Error::Other(format!("unknown status: {other}"))),
        }
    }
}

/// Validate a status transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Draft for a new work record. The store assigns identity and timestamps.
#[derive(Debug, Clone)]
pub struct NewWorkRecord {
    pub(crate) work_type: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) idempotency_key: Option<String>,
}

impl NewWorkRecord {
    pub fn new(work_type: impl Into<String>) -> Self {
        Self {
            work_type: work_type.into(),
            payload: serde_json::Value::Null,
            idempotency_key: None,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Client-supplied deduplication key. An empty key disables dedup.
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.idempotency_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn work_type(&self) -> &str {
        &self.work_type
    }

    pub fn key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn done_cannot_go_back_to_queued() {
        assert!(Status::Queued.can_transition_to(Status::Done));
        assert!(Status::Done.can_transition_to(Status::Done));
        assert!(!Status::Done.can_transition_to(Status::Queued));
    }

    #[test]
    fn apply_status_keeps_result_when_none_given() {
        let draft = NewWorkRecord::new("echo").payload(json!({"msg": "hi"}));
        let mut record = WorkRecord::from_draft(&draft);
        record
            .apply_status(Status::Queued, Some(json!({"partial": true})))
            .unwrap();
        record.apply_status(Status::Done, None).unwrap();

        assert_eq!(record.status, Status::Done);
        assert_eq!(record.result, Some(json!({"partial": true})));
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn empty_idempotency_key_means_no_key() {
        let draft = NewWorkRecord::new("echo").idempotency_key("");
        assert!(draft.key().is_none());
    }

    #[test]
    fn record_serializes_with_wire_field_names() {
        let record = WorkRecord::from_draft(&NewWorkRecord::new("echo"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "echo");
        assert_eq!(value["status"], "queued");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("result").is_none());
    }

    #[test]
    fn work_id_round_trips_through_display() {
        let id = WorkId::new();
        let parsed: WorkId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
