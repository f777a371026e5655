//! `recall_memory`: expand a compacted placeholder back into its original
//! messages.
//!
//! The entry's original message chain is spliced into the live conversation
//! in place of the placeholder that names it. The tool response itself only
//! carries a short status object; the restored content reaches the model
//! through the conversation, not through the tool result.

use crate::agent::profile::CompactionGate;
use crate::context::compaction::{is_compacted, recall_instruction};
use crate::context::conversation::Conversation;
use crate::error::{MemoryError, Result};
use crate::store::{MemoryEntry, MemoryStore};
use crate::tools::core::{Tool, ToolContext, ToolFuture, error_json, parse_tool_args, to_json_response};
use crate::{ToolDef, json_schema_for};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const RECALL_TOOL_NAME: &str = "recall_memory";

/// Arguments for `recall_memory`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecallArgs {
    /// The memory ID from a compacted placeholder, e.g. "mem_0f3a...".
    pub memory_id: String,
}

/// Status object returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallResponse {
    pub status: String,
    pub memory_id: String,
    pub summary: String,
    /// Messages spliced back into the conversation (0 if none).
    pub messages_restored: usize,
    pub pinned: bool,
    pub last_access: DateTime<Utc>,
    /// Why the original messages could not be restored, if they couldn't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expand_error: Option<String>,
}

/// Replace the most recent placeholder for `entry` with its original messages.
///
/// The search and the splice run as one [`Conversation::update`], so a
/// concurrent writer can't slip in between them.
///
/// Returns the number of messages restored: zero when the entry has no
/// stored originals or no placeholder for it is left in the conversation.
pub fn expand_in_conversation(conversation: &dyn Conversation, entry: &MemoryEntry) -> Result<usize> {
    let Some(originals) = entry.decode_original_messages()? else {
        return Ok(0);
    };

    let needle = recall_instruction(&entry.id);
    let mut restored = 0;
    conversation.update(&mut |messages| {
        if let Some(index) = messages
            .iter()
            .rposition(|m| is_compacted(m) && m.text().contains(&needle))
        {
            messages.splice(index..=index, originals.iter().cloned());
            restored = originals.len();
        }
    });
    Ok(restored)
}

/// The `recall_memory` tool.
pub struct RecallTool {
    store: Arc<MemoryStore>,
    gate: Option<CompactionGate>,
}

impl RecallTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store, gate: None }
    }

    /// Defer the next compaction pass through `gate` after every splice.
    pub fn with_gate(mut self, gate: CompactionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Recall `memory_id`, expanding it in the context's conversation if any.
    pub fn recall(&self, ctx: &ToolContext, memory_id: &str) -> Result<RecallResponse> {
        let entry = self.store.access(memory_id, MemoryEntry::touch)?;

        let mut messages_restored = 0;
        let mut expand_error = None;
        if let Some(conversation) = ctx.conversation() {
            match expand_in_conversation(conversation.as_ref(), &entry) {
                Ok(n) => messages_restored = n,
                Err(e @ MemoryError::DeserializationFailed(_)) => {
                    warn!("Recall of {memory_id} could not restore messages: {e}");
                    expand_error = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        if messages_restored > 0
            && let Some(gate) = &self.gate
        {
            gate.defer();
        }
        info!("Recalled {memory_id}: {messages_restored} message(s) restored");

        Ok(RecallResponse {
            status: "ok".into(),
            memory_id: entry.id,
            summary: entry.summary,
            messages_restored,
            pinned: entry.pinned,
            last_access: entry.last_access,
            expand_error,
        })
    }
}

impl Tool for RecallTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            RECALL_TOOL_NAME,
            "Restore a compacted memory. Older parts of this conversation may have \
             been replaced by '[Compacted memory <id>] <summary>' placeholders. Call \
             this with the placeholder's memory ID to put the full original messages \
             back into the conversation when you need their exact details.",
            json_schema_for::<RecallArgs>(),
        )
    }

    fn execute<'a>(&'a self, ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RecallArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            match self.recall(ctx, &args.memory_id) {
                Ok(response) => to_json_response(&response),
                Err(e) => {
                    warn!("recall_memory({}) failed: {e}", args.memory_id);
                    error_json(e.code(), Some(&args.memory_id), &e.to_string())
                }
            }
        })
    }
}
