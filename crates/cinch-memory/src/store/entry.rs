//! Persisted record types: memory entries and compaction audit events.

use crate::Message;
use crate::error::{MemoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every generated memory ID.
pub const MEMORY_ID_PREFIX: &str = "mem_";

/// Generate a fresh memory ID (`mem_` + 32 lowercase hex characters).
pub fn new_memory_id() -> String {
    format!("{MEMORY_ID_PREFIX}{}", uuid::Uuid::new_v4().simple())
}

/// One compacted turn: its summary, the placeholder that replaced it in the
/// live conversation, and the original messages for later recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    /// Full aggregated text of the turn.
    pub content: String,
    /// Summary of at most 20 words.
    pub summary: String,
    /// Text that replaced the turn in the conversation.
    #[serde(default)]
    pub placeholder: String,
    /// JSON array of the original messages, exactly as they were.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_messages: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
}

impl MemoryEntry {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        summary: impl Into<String>,
        placeholder: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            content: content.into(),
            summary: summary.into(),
            placeholder: placeholder.into(),
            original_messages: None,
            created_at: now,
            last_access: now,
            pinned: false,
        }
    }

    /// Attach the original message chain, serialized as JSON.
    pub fn with_original_messages(mut self, messages: &[Message]) -> Result<Self> {
        self.original_messages = Some(serde_json::to_string(messages)?);
        Ok(self)
    }

    /// Decode the stored original messages. `Ok(None)` when none were stored.
    pub fn decode_original_messages(&self) -> Result<Option<Vec<Message>>> {
        match self.original_messages.as_deref() {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw)
                .map(Some)
                .map_err(|e| MemoryError::DeserializationFailed(format!("{}: {e}", self.id))),
        }
    }

    /// Bump `last_access` to now.
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Audit record of one compaction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionEvent {
    pub timestamp: DateTime<Utc>,
    pub chars_before: usize,
    pub chars_after: usize,
    pub messages_compacted: usize,
    pub messages_considered: usize,
    pub duration_ms: u64,
}

impl CompactionEvent {
    /// Bytes freed by the pass (zero if the conversation grew).
    pub fn chars_freed(&self) -> usize {
        self.chars_before.saturating_sub(self.chars_after)
    }
}
