//! Agent-facing integration: the profile the agent loop drives each turn.
//!
//! - [`profile`]: [`ContextProfile`] with its `prepare` / `after_response`
//!   hooks, and the [`MemoryProfile`] that compacts into the store. Start
//!   here.
//! - [`config`]: [`MemoryConfig`] and threshold resolution per model.
//! - [`events`]: [`EventHandler`] and [`MemoryEvent`] for observing passes.
//!   Includes [`LoggingHandler`], [`CompositeEventHandler`] and
//!   [`FnEventHandler`].
//! - [`hooks`]: the [`FactsExtractor`] that sees the full context before
//!   anything is evicted.

pub mod config;
pub mod events;
pub mod hooks;
pub mod profile;

// Re-export commonly used items at the module level.
pub use config::{MemoryConfig, Thresholds, context_window_for_model};
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, MemoryEvent, NoopHandler,
};
pub use hooks::{FactsExtractor, FactsFuture, FnFactsExtractor};
pub use profile::{CompactionGate, ContextProfile, MemoryProfile, PrepareOutcome, ProfileKind};
