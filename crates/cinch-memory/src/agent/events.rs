//! Compaction lifecycle events and the handlers that observe them.
//!
//! The profile emits a [`MemoryEvent`] around every compaction pass so a UI
//! or telemetry sink can follow along. Handlers are plain observers: they
//! cannot alter the pass, and a handler that panics is the caller's problem.
//!
//! Several handlers can be combined with [`CompositeEventHandler`]:
//!
//! ```ignore
//! let handler = CompositeEventHandler::new()
//!     .with(LoggingHandler)
//!     .with(FnEventHandler::new(|event| {
//!         if let MemoryEvent::CompactionComplete { event, .. } = event {
//!             metrics.record(event.chars_freed());
//!         }
//!     }));
//! ```

use crate::store::CompactionEvent;
use tracing::{debug, info, warn};

/// Events emitted by the memory profile.
#[derive(Debug, Clone)]
pub enum MemoryEvent<'a> {
    /// A compaction pass is about to run.
    CompactionStart {
        /// Request size (bytes) that triggered the pass.
        size: usize,
        /// Conversation threshold in effect.
        threshold: usize,
        /// Whether the pass was forced.
        forced: bool,
    },
    /// A compaction pass finished and its audit record was written.
    CompactionComplete {
        event: &'a CompactionEvent,
        /// Entries created by this pass, oldest turn first.
        memory_ids: &'a [String],
        /// Empty shells dropped after the pass.
        shells_removed: usize,
    },
    /// A pass that would have run was skipped because a recall just
    /// restored content.
    CompactionDeferred { size: usize, threshold: usize },
    /// The facts extractor failed; compaction went ahead regardless.
    FactsExtractionFailed { error: &'a str },
}

impl MemoryEvent<'_> {
    /// Stable snake_case name, e.g. `"compaction_start"`.
    pub fn name(&self) -> &'static str {
        match self {
            MemoryEvent::CompactionStart { .. } => "compaction_start",
            MemoryEvent::CompactionComplete { .. } => "compaction_complete",
            MemoryEvent::CompactionDeferred { .. } => "compaction_deferred",
            MemoryEvent::FactsExtractionFailed { .. } => "facts_extraction_failed",
        }
    }
}

/// Observer for [`MemoryEvent`]s.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &MemoryEvent<'_>);
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &MemoryEvent<'_>) {}
}

/// Closure-based handler.
pub struct FnEventHandler<F>(F);

impl<F> FnEventHandler<F>
where
    F: Fn(&MemoryEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&MemoryEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &MemoryEvent<'_>) {
        (self.0)(event)
    }
}

/// Fans each event out to every registered handler, in registration order.
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` holds.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &MemoryEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &MemoryEvent<'_>) {
        match event {
            MemoryEvent::CompactionStart {
                size,
                threshold,
                forced,
            } => {
                info!(
                    "[compaction_start] {size} bytes, threshold {threshold}{}",
                    if *forced { " (forced)" } else { "" }
                );
            }
            MemoryEvent::CompactionComplete {
                event,
                memory_ids,
                shells_removed,
            } => {
                info!(
                    "[compaction_complete] {} -> {} bytes, {}/{} messages compacted, {} entries, {shells_removed} shells dropped, {}ms",
                    event.chars_before,
                    event.chars_after,
                    event.messages_compacted,
                    event.messages_considered,
                    memory_ids.len(),
                    event.duration_ms,
                );
                if !memory_ids.is_empty() {
                    debug!("[compaction_complete] entries: {}", memory_ids.join(", "));
                }
            }
            MemoryEvent::CompactionDeferred { size, threshold } => {
                debug!("[compaction_deferred] {size} bytes over {threshold}, recall just expanded");
            }
            MemoryEvent::FactsExtractionFailed { error } => {
                warn!("[facts_extraction_failed] {error}");
            }
        }
    }
}
