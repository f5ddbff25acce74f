//! The schedulable unit of work.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of work flowing through the engine.
///
/// Held by exactly one owner at a time: the channel, a worker, or a pending
/// retry timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    /// Mutable payload carried between attempts.
    pub result: Map<String, Value>,
    /// Failed executions so far. Incremented once per failure.
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Map::new(),
            attempts: 0,
        }
    }

    pub fn with_result(mut self, result: Map<String, Value>) -> Self {
        self.result = result;
        self
    }

    /// An item without identity is never processed.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}
