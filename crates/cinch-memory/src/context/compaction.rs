//! Turn compaction: summarize old turns into recallable placeholders.
//!
//! When the request grows past the conversation threshold, the oldest
//! complete turns outside the protected tail are summarized one at a time.
//! Each summarized turn is stored as a [`MemoryEntry`] together with its
//! original messages, and the turn is rewritten in place: the first message
//! becomes an assistant placeholder naming the entry and the rest become
//! empty shells. Shells keep every later turn index valid during the pass; the
//! caller drops them once the pass is over.
//!
//! Compaction stops as soon as the request fits again unless it was forced.
//! A turn whose summarization fails is left untouched and the pass moves on.

use crate::context::sizing::total_actual_size;
use crate::context::summarizer::{
    Summarize, aggregate_turn_text, clip_to_bytes, has_summarizable_text, summarize_turn,
};
use crate::context::turns::{Turn, segment_turns};
use crate::store::{CompactionEvent, MemoryEntry, MemoryStore, new_memory_id};
use crate::{Message, MessageRole, ToolDef};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Marker that opens every compaction placeholder.
///
/// Both the placeholder writer and the "already compacted?" check reference
/// this constant so they can't drift out of sync.
pub const COMPACTED_MARKER: &str = "[Compacted memory";

/// The recall call embedded in a placeholder, e.g. `recall_memory("mem_…")`.
pub fn recall_instruction(memory_id: &str) -> String {
    format!("recall_memory(\"{memory_id}\")")
}

/// Placeholder text that stands in for a compacted turn.
pub fn render_placeholder(memory_id: &str, summary: &str) -> String {
    format!(
        "{COMPACTED_MARKER} {memory_id}] {summary}\n\
         Full detail is stored. To restore it, call {}.",
        recall_instruction(memory_id)
    )
}

/// Whether a message's content carries a compaction placeholder.
pub fn is_compacted(message: &Message) -> bool {
    message.text().contains(COMPACTED_MARKER)
}

/// Per-pass parameters, resolved by the caller from configuration.
#[derive(Debug, Clone)]
pub struct CompactionSettings {
    /// Request size (bytes) above which compaction runs.
    pub conversation_threshold: usize,
    /// Cap (bytes) on the turn text sent to the summarizer.
    pub message_threshold: usize,
    /// Trailing messages that are never compacted.
    pub protected_recent: usize,
    /// Model used for summarization.
    pub summarization_model: String,
    /// System instruction for summarization.
    pub summarization_prompt: String,
    /// Compact every eligible turn regardless of size.
    pub force: bool,
}

impl CompactionSettings {
    /// Whether a request of `size` bytes should trigger a pass.
    pub fn triggers(&self, size: usize) -> bool {
        self.force || size > self.conversation_threshold
    }
}

/// What happened to one turn during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Summarized, stored and replaced by a placeholder.
    Compacted { memory_id: String },
    /// Every non-empty message already carries a placeholder.
    AlreadyCompacted,
    /// Only some messages carry a placeholder; left alone.
    Inconsistent,
    /// No content or reasoning text to summarize.
    NothingToSummarize,
    /// The summarizer failed or returned nothing.
    SummarizationFailed(String),
    /// The entry could not be stored.
    StoreFailed(String),
}

impl TurnOutcome {
    pub fn is_compacted(&self) -> bool {
        matches!(self, TurnOutcome::Compacted { .. })
    }
}

/// One turn's result within a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn: Turn,
    pub outcome: TurnOutcome,
}

/// Result of one compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub chars_before: usize,
    pub chars_after: usize,
    /// Messages in the turns the pass examined.
    pub messages_considered: usize,
    /// Messages in the turns the pass replaced.
    pub messages_compacted: usize,
    /// Empty shells dropped after the pass.
    pub shells_removed: usize,
    pub duration_ms: u64,
    pub turns: Vec<TurnReport>,
}

impl CompactionOutcome {
    /// IDs of entries created by this pass, oldest turn first.
    pub fn memory_ids(&self) -> Vec<&str> {
        self.turns
            .iter()
            .filter_map(|r| match &r.outcome {
                TurnOutcome::Compacted { memory_id } => Some(memory_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether any message was rewritten.
    pub fn mutated(&self) -> bool {
        self.messages_compacted > 0 || self.shells_removed > 0
    }

    /// Audit record for this pass.
    pub fn to_event(&self) -> CompactionEvent {
        CompactionEvent {
            timestamp: Utc::now(),
            chars_before: self.chars_before,
            chars_after: self.chars_after,
            messages_compacted: self.messages_compacted,
            messages_considered: self.messages_considered,
            duration_ms: self.duration_ms,
        }
    }
}

/// Summarizes and evicts old turns, writing entries to a [`MemoryStore`].
#[derive(Clone)]
pub struct CompactionEngine {
    store: Arc<MemoryStore>,
    summarizer: Arc<dyn Summarize>,
}

impl std::fmt::Debug for CompactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CompactionEngine {
    pub fn new(store: Arc<MemoryStore>, summarizer: Arc<dyn Summarize>) -> Self {
        Self { store, summarizer }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Run one compaction pass over `messages`.
    ///
    /// Eligible turns end before the protected tail and are processed oldest
    /// first. The pass stops once the request fits under the conversation
    /// threshold, unless `settings.force` is set. Compacted turns are left
    /// as a placeholder followed by empty shells; shells are not removed here.
    pub async fn compact(
        &self,
        messages: &mut [Message],
        schemas: Option<&[ToolDef]>,
        settings: &CompactionSettings,
    ) -> CompactionOutcome {
        let start = Instant::now();
        let chars_before = total_actual_size(messages, schemas);
        let boundary = messages.len().saturating_sub(settings.protected_recent);

        let eligible: Vec<Turn> = segment_turns(messages)
            .into_iter()
            .filter(|t| t.end < boundary)
            .collect();
        debug!(
            "Compaction pass: {chars_before} bytes (threshold {}), {} eligible turn(s) before index {boundary}{}",
            settings.conversation_threshold,
            eligible.len(),
            if settings.force { ", forced" } else { "" },
        );

        let mut size = chars_before;
        let mut considered = 0;
        let mut compacted = 0;
        let mut reports = Vec::with_capacity(eligible.len());

        for turn in eligible {
            if !settings.force && size <= settings.conversation_threshold {
                debug!("Request fits at {size} bytes; leaving turn {turn} and later intact");
                break;
            }

            considered += turn.len();
            let outcome = self.compact_turn(messages, turn, settings).await;
            if outcome.is_compacted() {
                compacted += turn.len();
                size = total_actual_size(messages, schemas);
            }
            reports.push(TurnReport { turn, outcome });
        }

        let outcome = CompactionOutcome {
            chars_before,
            chars_after: size,
            messages_considered: considered,
            messages_compacted: compacted,
            shells_removed: 0,
            duration_ms: start.elapsed().as_millis() as u64,
            turns: reports,
        };
        if compacted > 0 {
            info!(
                "Compacted {} turn(s), {compacted} message(s): {chars_before} -> {size} bytes",
                outcome.memory_ids().len()
            );
        }
        outcome
    }

    /// Summarize one turn, store it, and rewrite it in place.
    pub async fn compact_turn(
        &self,
        messages: &mut [Message],
        turn: Turn,
        settings: &CompactionSettings,
    ) -> TurnOutcome {
        let Some(span) = messages.get(turn.range()) else {
            warn!("Turn {turn} is out of range for {} messages", messages.len());
            return TurnOutcome::NothingToSummarize;
        };

        let non_empty = span.iter().filter(|m| !m.is_empty_shell()).count();
        let marked = span.iter().filter(|m| is_compacted(m)).count();
        if non_empty > 0 && marked == non_empty {
            debug!("Turn {turn} is already compacted");
            return TurnOutcome::AlreadyCompacted;
        }
        if marked > 0 {
            warn!(
                "Turn {turn} is partially compacted ({marked} of {non_empty} messages); skipping"
            );
            return TurnOutcome::Inconsistent;
        }
        if !has_summarizable_text(span) {
            debug!("Turn {turn} has no text to summarize");
            return TurnOutcome::NothingToSummarize;
        }

        let text = aggregate_turn_text(span);
        let input = clip_to_bytes(&text, settings.message_threshold);
        if input.len() < text.len() {
            debug!(
                "Turn {turn}: summarizer input clipped from {} to {} bytes",
                text.len(),
                input.len()
            );
        }

        let summary = match summarize_turn(
            self.summarizer.as_ref(),
            &settings.summarization_model,
            &settings.summarization_prompt,
            input,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!("Summarization failed for turn {turn}: {e}");
                return TurnOutcome::SummarizationFailed(e.to_string());
            }
        };

        let memory_id = new_memory_id();
        let placeholder = render_placeholder(&memory_id, &summary);
        let entry = match MemoryEntry::new(&memory_id, text, summary, &placeholder)
            .with_original_messages(span)
        {
            Ok(e) => e,
            Err(e) => {
                warn!("Could not serialize turn {turn} for {memory_id}: {e}");
                return TurnOutcome::StoreFailed(e.to_string());
            }
        };
        if let Err(e) = self.store.put(&entry) {
            warn!("Could not store turn {turn} as {memory_id}: {e}");
            return TurnOutcome::StoreFailed(e.to_string());
        }

        if let Some(span) = messages.get_mut(turn.range()) {
            for (i, msg) in span.iter_mut().enumerate() {
                msg.clear();
                if i == 0 {
                    // A tool-role placeholder would merge into the next turn
                    // once the shells are gone.
                    msg.role = MessageRole::Assistant;
                    msg.tool_call_id = None;
                    msg.name = None;
                    msg.content = Some(placeholder.clone());
                }
            }
        }
        debug!("Turn {turn} compacted into {memory_id}");
        TurnOutcome::Compacted { memory_id }
    }
}
