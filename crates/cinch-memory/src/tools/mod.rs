//! Model-facing memory tools.
//!
//! - [`core`]: the [`Tool`](core::Tool) trait, the per-call
//!   [`ToolContext`](core::ToolContext) and [`ToolSet`](core::ToolSet)
//!   dispatch.
//! - [`recall`]: `recall_memory`, which splices a compacted turn back into
//!   the conversation.
//! - [`pin`]: `pin_memory`, which marks entries as important within the pin
//!   ceiling.

pub mod core;
pub mod pin;
pub mod recall;

pub use self::core::{Tool, ToolContext, ToolFuture, ToolSet};
pub use pin::{PIN_TOOL_NAME, PinTool};
pub use recall::{RECALL_TOOL_NAME, RecallTool};
