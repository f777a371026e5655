//! Convenience re-exports for common `cinch-memory` types.
//!
//! Meant to be glob-imported by the agent loop:
//!
//! ```ignore
//! use cinch_memory::prelude::*;
//! ```
//!
//! This pulls in what wiring a profile needs: [`Message`] constructors, the
//! profile and its config, the summarizer and conversation seams, the tool
//! surface and event handlers. Engine internals (turn segmentation, sizing,
//! schema upgrades) are left out; import those from their modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{MemoryError, Message, MessageRole, Result, ToolCall, ToolDef, json_schema_for};

// ── Agent integration ───────────────────────────────────────────────
pub use crate::agent::{
    CompactionGate, CompositeEventHandler, ContextProfile, EventHandler, FactsExtractor,
    FnEventHandler, FnFactsExtractor, LoggingHandler, MemoryConfig, MemoryEvent, MemoryProfile,
    NoopHandler, PrepareOutcome, ProfileKind, Thresholds,
};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    CompactionOutcome, Conversation, FnSummarizer, SharedConversation, Summarize,
};

// ── Storage ─────────────────────────────────────────────────────────
pub use crate::store::{CompactionEvent, MemoryEntry, MemoryStore, StoreStats};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{PinTool, RecallTool, Tool, ToolContext, ToolFuture, ToolSet};
