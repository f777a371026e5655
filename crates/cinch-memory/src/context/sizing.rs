//! Size accounting for the compaction trigger.
//!
//! Sizes are byte lengths of the JSON wire form, which is what actually lands
//! in the request body. The active tool schemas count against the same
//! budget; before a schema set is registered a fixed padding stands in.

use crate::{DEFAULT_CHARS_PER_TOKEN, Message, ToolDef};
use tracing::trace;

/// Bytes charged for tool schemas when no schema set has been registered.
pub const TOOL_SCHEMA_PADDING: usize = 16_000;

/// Serialized byte length of a message list.
pub fn messages_size(messages: &[Message]) -> usize {
    serde_json::to_vec(messages).map_or(0, |v| v.len())
}

/// Serialized byte length of a tool-schema set, or [`TOOL_SCHEMA_PADDING`]
/// when none is registered.
pub fn schema_size(schemas: Option<&[ToolDef]>) -> usize {
    match schemas {
        Some(defs) => serde_json::to_vec(defs).map_or(TOOL_SCHEMA_PADDING, |v| v.len()),
        None => TOOL_SCHEMA_PADDING,
    }
}

/// Total request size: messages plus tool schemas.
pub fn total_actual_size(messages: &[Message], schemas: Option<&[ToolDef]>) -> usize {
    let msgs = messages_size(messages);
    let tools = schema_size(schemas);
    trace!(
        "Context size: {msgs} bytes of messages + {tools} bytes of tool schemas ({} messages)",
        messages.len()
    );
    msgs + tools
}

/// Convert a fraction of a token window into an absolute byte threshold.
pub fn threshold_bytes(fraction: f64, context_window_tokens: usize) -> usize {
    (fraction * context_window_tokens as f64 * DEFAULT_CHARS_PER_TOKEN).round() as usize
}

/// Rough token estimate for a byte count.
pub fn estimate_tokens(bytes: usize) -> usize {
    (bytes as f64 / DEFAULT_CHARS_PER_TOKEN).ceil() as usize
}
