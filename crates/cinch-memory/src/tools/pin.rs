//! `pin_memory`: protect a memory entry, or release it.

use crate::store::MemoryStore;
use crate::tools::core::{Tool, ToolContext, ToolFuture, error_json, parse_tool_args, to_json_response};
use crate::{ToolDef, json_schema_for};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

pub const PIN_TOOL_NAME: &str = "pin_memory";

fn default_pin() -> bool {
    true
}

/// Arguments for `pin_memory`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PinArgs {
    /// The memory ID to pin or unpin.
    pub memory_id: String,
    /// `true` to pin (default), `false` to unpin.
    #[serde(default = "default_pin")]
    pub pin: bool,
}

/// Status object returned to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinResponse {
    pub status: String,
    pub memory_id: String,
    pub pinned: bool,
    /// Pinned entries across the whole store after this call.
    pub pinned_count: usize,
    pub max_pins: usize,
}

/// The `pin_memory` tool.
pub struct PinTool {
    store: Arc<MemoryStore>,
    max_pins: usize,
}

impl PinTool {
    pub fn new(store: Arc<MemoryStore>, max_pins: usize) -> Self {
        Self { store, max_pins }
    }

    pub fn pin(&self, memory_id: &str, pin: bool) -> crate::Result<PinResponse> {
        let entry = self.store.pin(memory_id, pin, self.max_pins)?;
        Ok(PinResponse {
            status: "ok".into(),
            memory_id: entry.id,
            pinned: entry.pinned,
            pinned_count: self.store.pinned_count()?,
            max_pins: self.max_pins,
        })
    }
}

impl Tool for PinTool {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            PIN_TOOL_NAME,
            format!(
                "Pin a compacted memory so it is kept as important context, or unpin it \
                 with pin=false. At most {} memories can be pinned at once; unpin one \
                 before pinning another.",
                self.max_pins
            ),
            json_schema_for::<PinArgs>(),
        )
    }

    fn execute<'a>(&'a self, _ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: PinArgs = match parse_tool_args(arguments) {
                Ok(a) => a,
                Err(e) => return e,
            };
            match self.pin(&args.memory_id, args.pin) {
                Ok(response) => to_json_response(&response),
                Err(e) => {
                    warn!("pin_memory({}) failed: {e}", args.memory_id);
                    error_json(e.code(), Some(&args.memory_id), &e.to_string())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEntry;

    fn store_with(n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        for i in 0..n {
            store
                .put(&MemoryEntry::new(format!("mem_{i}"), "c", "s", "p"))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn pins_by_default() {
        let tool = PinTool::new(store_with(1), 5);
        let raw = tool.execute(&ToolContext::new(), r#"{"memory_id":"mem_0"}"#).await;
        let response: PinResponse = serde_json::from_str(&raw).unwrap();
        assert!(response.pinned);
        assert_eq!(response.pinned_count, 1);
        assert_eq!(response.max_pins, 5);
    }

    #[tokio::test]
    async fn sixth_pin_is_refused() {
        let tool = PinTool::new(store_with(6), 5);
        for i in 0..5 {
            assert!(tool.pin(&format!("mem_{i}"), true).unwrap().pinned);
        }
        let raw = tool.execute(&ToolContext::new(), r#"{"memory_id":"mem_5"}"#).await;
        let body: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(body["error"], "pin_limit_exceeded");
        assert_eq!(body["memory_id"], "mem_5");

        let raw = tool
            .execute(&ToolContext::new(), r#"{"memory_id":"mem_2","pin":false}"#)
            .await;
        let response: PinResponse = serde_json::from_str(&raw).unwrap();
        assert!(!response.pinned);
        assert_eq!(response.pinned_count, 4);

        assert!(tool.pin("mem_5", true).unwrap().pinned);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let tool = PinTool::new(store_with(0), 5);
        let raw = tool.execute(&ToolContext::new(), r#"{"memory_id":"mem_x"}"#).await;
        assert!(raw.contains("not_found"));
    }

    #[test]
    fn definition_mentions_limit() {
        let tool = PinTool::new(store_with(0), 3);
        let def = tool.definition();
        assert_eq!(def.function.name, PIN_TOOL_NAME);
        assert!(def.function.description.contains("At most 3"));
    }
}
