//! Offline mutation records.

use crate::meta::Tag;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A write recorded while disconnected.
///
/// Created by the transport facade when `mutate` or `upload` is called
/// offline, and owned by the offline queue until a replay of it has been
/// confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
    /// Unique per enqueue.
    pub id: String,
    /// The operation to replay.
    pub operation: Operation,
    /// Serializable payload passed back to the adapter on replay.
    pub variables: Value,
    /// Enqueue time, Unix millis.
    pub created_at: u64,
    /// Cache regions to invalidate after a confirmed replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<Tag>>,
}

impl QueuedMutation {
    /// Creates a new entry with a fresh id and the current time.
    pub fn new(operation: Operation, variables: Value, tags: Option<Vec<Tag>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            variables,
            created_at: now_millis(),
            tags: tags.filter(|t| !t.is_empty()),
        }
    }

    /// Returns the tags, or an empty slice.
    pub fn tags(&self) -> &[Tag] {
        self.tags.as_deref().unwrap_or(&[])
    }
}

/// Current time as Unix millis.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
