//! Context window management: turn segmentation, sizing, summarization and
//! compaction.
//!
//! The pieces, leaves first:
//!
//! 1. **[`turns`]** groups a flat message list into assistant turns, the unit
//!    of compaction.
//! 2. **[`sizing`]** measures the request (messages plus tool schemas) in
//!    bytes of JSON.
//! 3. **[`summarizer`]** builds the summarization input and enforces the
//!    20-word cap on the result.
//! 4. **[`compaction`]** decides which turns to evict, stores them and
//!    swaps in recallable placeholders.
//! 5. **[`conversation`]** is the accessor through which the live message
//!    list is read and replaced.

pub mod compaction;
pub mod conversation;
pub mod sizing;
pub mod summarizer;
pub mod turns;

// Re-export commonly used items at the module level.
pub use compaction::{
    COMPACTED_MARKER, CompactionEngine, CompactionOutcome, CompactionSettings, TurnOutcome,
    recall_instruction, render_placeholder,
};
pub use conversation::{Conversation, SharedConversation};
pub use sizing::{TOOL_SCHEMA_PADDING, total_actual_size};
pub use summarizer::{FnSummarizer, Summarize, SummaryFuture};
pub use turns::{Turn, segment_turns};
