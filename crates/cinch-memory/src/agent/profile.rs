//! Context profiles: the per-turn entry points into the memory subsystem.
//!
//! The agent loop calls [`ContextProfile::prepare`] before every model call
//! and [`ContextProfile::after_response`] once the reply has arrived. The
//! `Noop` profile passes messages through untouched; the `Memory` profile
//! compacts old turns into the [`MemoryStore`] and exposes the
//! `recall_memory` / `pin_memory` tools.
//!
//! # Flags
//!
//! Two one-shot flags steer the next pass:
//!
//! - **skip** is set by [`MemoryProfile::defer_compaction`] (the recall tool
//!   calls it after restoring messages) and consumed by the next `prepare`
//!   or by `after_response`, whichever comes first. A `prepare` that consumes
//!   it runs no pass, so restored content reaches the model intact.
//! - **force** is set by [`MemoryProfile::force_compaction`] and consumed by
//!   the next pass that actually runs. Skip wins when both are set; force
//!   then stays pending.

use crate::Message;
use crate::ToolDef;
use crate::agent::config::{MemoryConfig, Thresholds};
use crate::agent::events::{EventHandler, MemoryEvent};
use crate::agent::hooks::FactsExtractor;
use crate::context::compaction::{CompactionEngine, CompactionOutcome, CompactionSettings};
use crate::context::conversation::{Conversation, remove_empty_shells};
use crate::context::sizing::total_actual_size;
use crate::context::summarizer::Summarize;
use crate::error::{MemoryError, Result};
use crate::store::{CompactionEvent, MemoryStore, StoreStats};
use crate::tools::{PinTool, RecallTool, ToolSet};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

// ── Profile selection ──────────────────────────────────────────────

/// Which profile to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileKind {
    Noop,
    #[default]
    Memory,
}

impl FromStr for ProfileKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noop" | "none" => Ok(ProfileKind::Noop),
            "memory" => Ok(ProfileKind::Memory),
            other => Err(MemoryError::ConfigInvalid(format!(
                "unknown context profile '{other}' (expected 'noop' or 'memory')"
            ))),
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileKind::Noop => write!(f, "noop"),
            ProfileKind::Memory => write!(f, "memory"),
        }
    }
}

/// Result of [`ContextProfile::prepare`].
#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    /// Messages to send, after any compaction.
    pub messages: Vec<Message>,
    /// Whether the conversation was rewritten.
    pub mutated: bool,
    /// Details of the pass, if one ran.
    pub compaction: Option<CompactionOutcome>,
}

impl PrepareOutcome {
    fn unchanged(messages: Vec<Message>) -> Self {
        Self {
            messages,
            mutated: false,
            compaction: None,
        }
    }
}

/// The active context profile.
#[derive(Debug)]
pub enum ContextProfile {
    /// Leaves the conversation alone and exposes no tools.
    Noop,
    /// Compacts into a memory store and exposes recall/pin tools.
    Memory(MemoryProfile),
}

impl ContextProfile {
    /// Build the profile selected by `kind`. The memory profile opens its
    /// store at `config.store_path`.
    pub fn build(
        kind: ProfileKind,
        config: MemoryConfig,
        provider: &str,
        model: &str,
        summarizer: Arc<dyn Summarize>,
    ) -> Result<Self> {
        match kind {
            ProfileKind::Noop => Ok(ContextProfile::Noop),
            ProfileKind::Memory => Ok(ContextProfile::Memory(MemoryProfile::new(
                config, provider, model, summarizer,
            )?)),
        }
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            ContextProfile::Noop => ProfileKind::Noop,
            ContextProfile::Memory(_) => ProfileKind::Memory,
        }
    }

    pub fn as_memory(&self) -> Option<&MemoryProfile> {
        match self {
            ContextProfile::Memory(p) => Some(p),
            ContextProfile::Noop => None,
        }
    }

    pub async fn prepare(&self, conversation: &dyn Conversation) -> PrepareOutcome {
        match self {
            ContextProfile::Noop => PrepareOutcome::unchanged(conversation.messages()),
            ContextProfile::Memory(p) => p.prepare(conversation).await,
        }
    }

    pub fn after_response(&self, conversation: &dyn Conversation) {
        if let ContextProfile::Memory(p) = self {
            p.after_response(conversation);
        }
    }

    /// Tools this profile contributes to the agent's tool set.
    pub fn tools(&self) -> ToolSet {
        match self {
            ContextProfile::Noop => ToolSet::new(),
            ContextProfile::Memory(p) => p.tools(),
        }
    }
}

// ── Shared state ───────────────────────────────────────────────────

/// Everything mutable about a memory profile, behind one lock.
struct ProfileState {
    config: MemoryConfig,
    provider: String,
    model: String,
    thresholds: Thresholds,
    summarization_model: String,
    protected_recent: usize,
    skip_next: bool,
    force_next: bool,
    tool_schemas: Option<Vec<ToolDef>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    facts_extractor: Option<Arc<dyn FactsExtractor>>,
    history: VecDeque<CompactionEvent>,
}

impl ProfileState {
    fn new(config: MemoryConfig, provider: &str, model: &str) -> Self {
        let thresholds = Thresholds::resolve(&config, provider, model);
        let summarization_model = config
            .summarization_model
            .clone()
            .unwrap_or_else(|| model.to_string());
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            thresholds,
            summarization_model,
            protected_recent: config.protected_recent,
            skip_next: false,
            force_next: false,
            tool_schemas: None,
            event_handler: None,
            facts_extractor: None,
            history: VecDeque::with_capacity(config.history_capacity),
            config,
        }
    }

    fn recompute(&mut self) {
        self.thresholds = Thresholds::resolve(&self.config, &self.provider, &self.model);
        self.summarization_model = self
            .config
            .summarization_model
            .clone()
            .unwrap_or_else(|| self.model.clone());
    }

    fn record(&mut self, event: CompactionEvent) {
        let capacity = self.config.history_capacity;
        if capacity == 0 {
            return;
        }
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }
}

type SharedState = Arc<RwLock<ProfileState>>;

fn emit(handler: Option<&dyn EventHandler>, event: &MemoryEvent<'_>) {
    if let Some(handler) = handler {
        handler.on_event(event);
    }
}

fn read(state: &SharedState) -> RwLockReadGuard<'_, ProfileState> {
    state.read().unwrap_or_else(|e| e.into_inner())
}

fn write(state: &SharedState) -> RwLockWriteGuard<'_, ProfileState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}

/// Handle onto a profile's skip/force flags.
///
/// Cloned into the recall tool so a splice can defer the next pass. It
/// shares the profile's state lock rather than keeping flags of its own.
#[derive(Clone)]
pub struct CompactionGate {
    state: SharedState,
}

impl CompactionGate {
    /// Skip the next compaction pass.
    pub fn defer(&self) {
        write(&self.state).skip_next = true;
        debug!("Next compaction pass deferred");
    }

    /// Run every eligible turn on the next pass.
    pub fn force(&self) {
        write(&self.state).force_next = true;
        debug!("Next compaction pass forced");
    }

    pub fn is_deferred(&self) -> bool {
        read(&self.state).skip_next
    }

    pub fn is_forced(&self) -> bool {
        read(&self.state).force_next
    }
}

impl fmt::Debug for CompactionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.state);
        f.debug_struct("CompactionGate")
            .field("skip_next", &state.skip_next)
            .field("force_next", &state.force_next)
            .finish()
    }
}

// ── Memory profile ─────────────────────────────────────────────────

/// Compacting profile backed by a [`MemoryStore`].
pub struct MemoryProfile {
    engine: CompactionEngine,
    state: SharedState,
}

impl fmt::Debug for MemoryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.state);
        f.debug_struct("MemoryProfile")
            .field("store", self.engine.store())
            .field("model", &state.model)
            .field("thresholds", &state.thresholds)
            .field("skip_next", &state.skip_next)
            .field("force_next", &state.force_next)
            .finish_non_exhaustive()
    }
}

impl MemoryProfile {
    /// Validate `config` and open the store at `config.store_path`.
    pub fn new(
        config: MemoryConfig,
        provider: &str,
        model: &str,
        summarizer: Arc<dyn Summarize>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MemoryStore::open(&config.store_path)?);
        Self::with_store(config, store, provider, model, summarizer)
    }

    /// Build on an already-open store. `config.store_path` is recorded but
    /// not opened.
    pub fn with_store(
        config: MemoryConfig,
        store: Arc<MemoryStore>,
        provider: &str,
        model: &str,
        summarizer: Arc<dyn Summarize>,
    ) -> Result<Self> {
        config.validate()?;
        let state = ProfileState::new(config, provider, model);
        info!(
            "Memory profile ready: {provider}/{model}, compaction above {} bytes, summaries by {}",
            state.thresholds.conversation_bytes, state.summarization_model
        );
        Ok(Self {
            engine: CompactionEngine::new(store, summarizer),
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.engine.store()
    }

    pub fn gate(&self) -> CompactionGate {
        CompactionGate {
            state: self.state.clone(),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Compact the conversation if it has outgrown the threshold.
    ///
    /// The pass works on a snapshot. Its rewrite is written back only when
    /// the live conversation still starts with that snapshot; messages
    /// appended meanwhile are kept after the rewritten prefix. Any other
    /// concurrent change wins and the rewrite is dropped, leaving the stored
    /// entries unreferenced.
    pub async fn prepare(&self, conversation: &dyn Conversation) -> PrepareOutcome {
        let snapshot = conversation.messages();
        let mut messages = snapshot.clone();

        let (settings, schemas, skip, handler, extractor) = {
            let mut state = write(&self.state);
            let skip = std::mem::take(&mut state.skip_next);
            let settings = CompactionSettings {
                conversation_threshold: state.thresholds.conversation_bytes,
                message_threshold: state.thresholds.message_bytes,
                protected_recent: state.protected_recent,
                summarization_model: state.summarization_model.clone(),
                summarization_prompt: state.config.summarization_prompt.clone(),
                force: state.force_next,
            };
            (
                settings,
                state.tool_schemas.clone(),
                skip,
                state.event_handler.clone(),
                state.facts_extractor.clone(),
            )
        };

        let size = total_actual_size(&messages, schemas.as_deref());
        if !settings.triggers(size) {
            debug!(
                "No compaction: {size} bytes within {} ({} messages)",
                settings.conversation_threshold,
                messages.len()
            );
            return PrepareOutcome::unchanged(messages);
        }
        if skip {
            debug!("Compaction skipped at {size} bytes: a recall was just expanded");
            emit(
                handler.as_deref(),
                &MemoryEvent::CompactionDeferred {
                    size,
                    threshold: settings.conversation_threshold,
                },
            );
            return PrepareOutcome::unchanged(messages);
        }
        if settings.force {
            write(&self.state).force_next = false;
        }

        if let Some(extractor) = &extractor
            && let Err(e) = extractor.extract(&messages).await
        {
            warn!("Facts extraction failed before compaction: {e}");
            let error = e.to_string();
            emit(
                handler.as_deref(),
                &MemoryEvent::FactsExtractionFailed { error: &error },
            );
        }

        emit(
            handler.as_deref(),
            &MemoryEvent::CompactionStart {
                size,
                threshold: settings.conversation_threshold,
                forced: settings.force,
            },
        );

        let mut outcome = self
            .engine
            .compact(&mut messages, schemas.as_deref(), &settings)
            .await;
        outcome.shells_removed = remove_empty_shells(&mut messages);
        outcome.chars_after = total_actual_size(&messages, schemas.as_deref());

        let mut mutated = outcome.mutated();
        let messages = if mutated {
            // Apply the rewrite only if nothing but appends happened since the
            // snapshot; a recall that landed meanwhile must not be undone.
            let mut current = Vec::new();
            conversation.update(&mut |live| {
                mutated = live.starts_with(&snapshot);
                if mutated {
                    let appended = live.split_off(snapshot.len());
                    live.clone_from(&messages);
                    live.extend(appended);
                }
                current = live.clone();
            });
            if !mutated {
                warn!(
                    "Conversation changed during compaction; leaving it as is ({} new entries stay in the store)",
                    outcome.memory_ids().len()
                );
            }
            current
        } else {
            messages
        };

        let event = outcome.to_event();
        if let Err(e) = self.store().save_compaction_event(&event) {
            warn!("Could not persist compaction event: {e}");
        }
        write(&self.state).record(event.clone());

        let memory_ids: Vec<String> = outcome.memory_ids().into_iter().map(String::from).collect();
        emit(
            handler.as_deref(),
            &MemoryEvent::CompactionComplete {
                event: &event,
                memory_ids: &memory_ids,
                shells_removed: outcome.shells_removed,
            },
        );

        PrepareOutcome {
            messages,
            mutated,
            compaction: Some(outcome),
        }
    }

    /// Called once the model has replied. Clears the skip flag.
    pub fn after_response(&self, _conversation: &dyn Conversation) {
        let mut state = write(&self.state);
        if state.skip_next {
            debug!("Compaction re-enabled after response");
        }
        state.skip_next = false;
    }

    // ── Runtime controls ───────────────────────────────────────────

    pub fn set_protected_recent(&self, n: usize) {
        write(&self.state).protected_recent = n;
    }

    pub fn protected_recent(&self) -> usize {
        read(&self.state).protected_recent
    }

    /// Compact every eligible turn on the next pass, regardless of size.
    pub fn force_compaction(&self) {
        self.gate().force();
    }

    /// Skip the next compaction pass.
    pub fn defer_compaction(&self) {
        self.gate().defer();
    }

    pub fn is_compaction_deferred(&self) -> bool {
        read(&self.state).skip_next
    }

    /// Swap in a new configuration.
    ///
    /// Fails with `ConfigInvalid` if `config` doesn't validate or names a
    /// different store path; the current configuration then stays in effect.
    pub fn reload_config(&self, config: MemoryConfig) -> Result<()> {
        config.validate()?;
        let mut state = write(&self.state);
        if config.store_path != state.config.store_path {
            return Err(MemoryError::ConfigInvalid(format!(
                "store_path cannot change without a restart ({} -> {})",
                state.config.store_path.display(),
                config.store_path.display()
            )));
        }

        state.protected_recent = config.protected_recent;
        state.config = config;
        state.recompute();
        while state.history.len() > state.config.history_capacity {
            state.history.pop_front();
        }
        info!(
            "Memory config reloaded: compaction above {} bytes, summary input capped at {} bytes",
            state.thresholds.conversation_bytes, state.thresholds.message_bytes
        );
        Ok(())
    }

    /// Follow a mid-session model switch.
    pub fn update_provider_model(&self, provider: &str, model: &str) {
        let mut state = write(&self.state);
        state.provider = provider.to_string();
        state.model = model.to_string();
        state.recompute();
        info!(
            "Memory profile now tracking {provider}/{model}: compaction above {} bytes",
            state.thresholds.conversation_bytes
        );
    }

    pub fn config(&self) -> MemoryConfig {
        read(&self.state).config.clone()
    }

    pub fn thresholds(&self) -> Thresholds {
        read(&self.state).thresholds
    }

    pub fn summarization_model(&self) -> String {
        read(&self.state).summarization_model.clone()
    }

    // ── Collaborators ──────────────────────────────────────────────

    /// Register the active tool schemas for size accounting.
    pub fn set_tool_schemas(&self, schemas: Vec<ToolDef>) {
        write(&self.state).tool_schemas = Some(schemas);
    }

    pub fn set_event_handler(&self, handler: impl EventHandler + 'static) {
        write(&self.state).event_handler = Some(Arc::new(handler));
    }

    pub fn set_facts_extractor(&self, extractor: impl FactsExtractor + 'static) {
        write(&self.state).facts_extractor = Some(Arc::new(extractor));
    }

    /// `recall_memory` and `pin_memory`, bound to this profile's store.
    ///
    /// The pin ceiling is read from the current config, so tools built after
    /// a reload pick up a new `max_pins`.
    pub fn tools(&self) -> ToolSet {
        let max_pins = read(&self.state).config.max_pins;
        ToolSet::new()
            .with(RecallTool::new(self.store().clone()).with_gate(self.gate()))
            .with(PinTool::new(self.store().clone(), max_pins))
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Recent compaction events, oldest first.
    pub fn compaction_history(&self) -> Vec<CompactionEvent> {
        read(&self.state).history.iter().cloned().collect()
    }

    pub fn stats(&self, limit: usize) -> Result<StoreStats> {
        self.store().stats(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::FnEventHandler;
    use crate::agent::hooks::FnFactsExtractor;
    use crate::context::compaction::{
        COMPACTED_MARKER, is_compacted, recall_instruction, render_placeholder,
    };
    use crate::context::conversation::SharedConversation;
    use crate::context::summarizer::FnSummarizer;
    use crate::tools::{PIN_TOOL_NAME, RECALL_TOOL_NAME, ToolContext};
    use crate::{ToolCall, store::MemoryEntry};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// A window of 1,500 tokens: compaction above 3,150 bytes.
    fn config() -> MemoryConfig {
        MemoryConfig::default()
            .with_context_window(1_500)
            .with_message_threshold(0.5)
    }

    fn summarizer() -> Arc<dyn Summarize> {
        Arc::new(FnSummarizer::new(|_, _, _| async { Ok("read a big file".to_string()) }))
    }

    fn profile_with(config: MemoryConfig) -> MemoryProfile {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let profile = MemoryProfile::with_store(config, store, "openrouter", "acme/model", summarizer()).unwrap();
        profile.set_tool_schemas(Vec::new());
        profile
    }

    fn turn(i: usize, bytes: usize) -> Vec<Message> {
        vec![
            Message::assistant_tool_calls(vec![ToolCall::new(
                format!("call_{i}"),
                "read_file",
                format!(r#"{{"path":"f{i}.rs"}}"#),
            )]),
            Message::tool_result(format!("call_{i}"), "x".repeat(bytes)).with_name("read_file"),
            Message::assistant_text(format!("done {i}")),
        ]
    }

    /// Two 2 kB turns followed by a protected tail: about 4.6 kB in total.
    fn conversation() -> SharedConversation {
        let mut messages = vec![Message::user("start")];
        messages.extend(turn(0, 2_000));
        messages.extend(turn(1, 2_000));
        messages.push(Message::user("more"));
        messages.push(Message::assistant_text("last"));
        SharedConversation::new(messages)
    }

    #[test]
    fn profile_kind_parsing() {
        assert_eq!("noop".parse::<ProfileKind>().unwrap(), ProfileKind::Noop);
        assert_eq!("None".parse::<ProfileKind>().unwrap(), ProfileKind::Noop);
        assert_eq!(" memory ".parse::<ProfileKind>().unwrap(), ProfileKind::Memory);
        assert_eq!("vector".parse::<ProfileKind>().unwrap_err().code(), "config_invalid");
        assert_eq!(ProfileKind::Memory.to_string(), "memory");
    }

    #[tokio::test]
    async fn noop_profile_passes_through() {
        let profile = ContextProfile::build(
            ProfileKind::Noop,
            MemoryConfig::default(),
            "openrouter",
            "acme/model",
            summarizer(),
        )
        .unwrap();
        let conv = conversation();
        let before = conv.messages();

        let outcome = profile.prepare(&conv).await;
        assert!(!outcome.mutated);
        assert!(outcome.compaction.is_none());
        assert_eq!(outcome.messages, before);
        assert!(profile.tools().is_empty());
        assert!(profile.as_memory().is_none());
    }

    #[tokio::test]
    async fn memory_profile_opens_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.redb");
        let profile = ContextProfile::build(
            ProfileKind::Memory,
            config().with_store_path(&path),
            "openrouter",
            "acme/model",
            summarizer(),
        )
        .unwrap();
        assert_eq!(profile.kind(), ProfileKind::Memory);
        assert!(path.exists());
        let tools = profile.tools();
        assert!(tools.contains(RECALL_TOOL_NAME));
        assert!(tools.contains(PIN_TOOL_NAME));
    }

    #[tokio::test]
    async fn below_threshold_is_untouched() {
        let profile = profile_with(config().with_context_window(100_000));
        let conv = conversation();
        let outcome = profile.prepare(&conv).await;
        assert!(!outcome.mutated);
        assert!(outcome.compaction.is_none());
        assert!(profile.compaction_history().is_empty());
        assert_eq!(profile.store().len().unwrap(), 0);
    }

    #[tokio::test]
    async fn over_threshold_compacts_oldest_turn_and_drops_shells() {
        let profile = profile_with(config());
        let conv = conversation();
        let before = conv.messages();

        let outcome = profile.prepare(&conv).await;
        assert!(outcome.mutated);
        let pass = outcome.compaction.unwrap();
        assert_eq!(pass.memory_ids().len(), 1);
        assert_eq!(pass.messages_compacted, 3);
        assert_eq!(pass.shells_removed, 2);
        assert!(pass.chars_after < pass.chars_before);
        assert!(pass.chars_after <= profile.thresholds().conversation_bytes);

        let messages = conv.messages();
        assert_eq!(messages, outcome.messages);
        assert_eq!(messages.len(), before.len() - 2);
        assert!(is_compacted(&messages[1]));
        assert!(messages[1].text().contains(pass.memory_ids()[0]));
        assert_eq!(messages[2..], before[4..]);

        assert_eq!(profile.compaction_history().len(), 1);
        assert_eq!(profile.store().load_compaction_events(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_prepare_is_a_no_op() {
        let profile = profile_with(config());
        let conv = conversation();
        let first = profile.prepare(&conv).await;
        let entries = profile.store().len().unwrap();

        let second = profile.prepare(&conv).await;
        assert!(!second.mutated);
        assert_eq!(second.messages, first.messages);
        assert_eq!(profile.store().len().unwrap(), entries);
    }

    #[tokio::test]
    async fn deferral_covers_only_the_next_prepare() {
        let profile = profile_with(config());
        let conv = conversation();

        profile.defer_compaction();
        profile.force_compaction();
        let outcome = profile.prepare(&conv).await;
        assert!(outcome.compaction.is_none());
        assert!(!profile.is_compaction_deferred());
        assert!(profile.gate().is_forced());

        let pass = profile.prepare(&conv).await.compaction.unwrap();
        assert_eq!(pass.memory_ids().len(), 2);
        assert!(!profile.gate().is_forced());
    }

    #[tokio::test]
    async fn after_response_clears_an_unused_deferral() {
        let profile = profile_with(config());
        let conv = conversation();

        profile.defer_compaction();
        profile.after_response(&conv);
        assert!(!profile.is_compaction_deferred());
        assert!(profile.prepare(&conv).await.compaction.is_some());
    }

    #[tokio::test]
    async fn forced_pass_ignores_threshold_once() {
        let profile = profile_with(config().with_context_window(100_000));
        let conv = conversation();

        profile.force_compaction();
        let pass = profile.prepare(&conv).await.compaction.unwrap();
        assert_eq!(pass.memory_ids().len(), 2);
        assert!(conv.messages().iter().filter(|m| is_compacted(m)).count() == 2);

        conv.push(Message::user("again"));
        assert!(profile.prepare(&conv).await.compaction.is_none());
    }

    #[tokio::test]
    async fn protected_tail_is_never_touched() {
        let profile = profile_with(config());
        profile.set_protected_recent(5);
        assert_eq!(profile.protected_recent(), 5);
        profile.force_compaction();

        let conv = conversation();
        let before = conv.messages();
        let pass = profile.prepare(&conv).await.compaction.unwrap();
        // Only turn 0 ends before index len - 5.
        assert_eq!(pass.memory_ids().len(), 1);
        let after = conv.messages();
        assert_eq!(after[after.len() - 5..], before[before.len() - 5..]);
    }

    #[tokio::test]
    async fn events_bracket_each_pass() {
        let profile = profile_with(config());
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        profile.set_event_handler(FnEventHandler::new(move |event: &MemoryEvent<'_>| {
            sink.lock().unwrap().push(event.name());
        }));

        profile.prepare(&conversation()).await;
        assert_eq!(*names.lock().unwrap(), vec!["compaction_start", "compaction_complete"]);
    }

    #[tokio::test]
    async fn failing_facts_extractor_does_not_block() {
        let profile = profile_with(config());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        profile.set_facts_extractor(FnFactsExtractor::new(move |messages: Vec<Message>| {
            seen.store(messages.len(), Ordering::SeqCst);
            async { Err(MemoryError::Storage("facts store offline".into())) }
        }));
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        profile.set_event_handler(FnEventHandler::new(move |event: &MemoryEvent<'_>| {
            if matches!(event, MemoryEvent::FactsExtractionFailed { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let conv = conversation();
        let full = conv.len();
        let outcome = profile.prepare(&conv).await;
        assert!(outcome.mutated);
        assert_eq!(calls.load(Ordering::SeqCst), full);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_is_capped() {
        let profile = profile_with(config().with_history_capacity(2));
        let conv = conversation();
        for _ in 0..3 {
            profile.force_compaction();
            profile.prepare(&conv).await;
        }
        assert_eq!(profile.compaction_history().len(), 2);
        assert_eq!(profile.store().load_compaction_events(10).unwrap().len(), 3);
    }

    #[test]
    fn reload_rejects_store_path_change_and_keeps_old_config() {
        let profile = profile_with(config());
        let before = profile.config();

        let err = profile
            .reload_config(config().with_store_path("/elsewhere/memory.redb"))
            .unwrap_err();
        assert_eq!(err.code(), "config_invalid");
        assert_eq!(profile.config(), before);

        let err = profile.reload_config(config().with_max_pins(0)).unwrap_err();
        assert_eq!(err.code(), "config_invalid");
        assert_eq!(profile.config(), before);
    }

    #[test]
    fn reload_recomputes_thresholds() {
        let profile = profile_with(config());
        assert_eq!(profile.thresholds().conversation_bytes, 3_150);

        profile
            .reload_config(config().with_conversation_threshold(0.8).with_protected_recent(4))
            .unwrap();
        assert_eq!(profile.thresholds().conversation_bytes, 4_200);
        assert_eq!(profile.protected_recent(), 4);
    }

    #[test]
    fn model_switch_updates_thresholds_and_summarizer() {
        let profile = profile_with(MemoryConfig::default());
        assert_eq!(profile.summarization_model(), "acme/model");
        assert_eq!(profile.thresholds().context_window_tokens, 128_000);

        profile.update_provider_model("anthropic", "anthropic/claude-sonnet-4");
        assert_eq!(profile.summarization_model(), "anthropic/claude-sonnet-4");
        assert_eq!(profile.thresholds().context_window_tokens, 200_000);

        let pinned = profile_with(MemoryConfig::default().with_summarization_model("cheap/model"));
        pinned.update_provider_model("anthropic", "anthropic/claude-sonnet-4");
        assert_eq!(pinned.summarization_model(), "cheap/model");
    }

    #[tokio::test]
    async fn recall_through_tools_defers_next_pass() {
        let profile = profile_with(config());
        let conv = Arc::new(conversation());
        let pass = profile.prepare(conv.as_ref()).await.compaction.unwrap();
        let id = pass.memory_ids()[0].to_string();

        let ctx = ToolContext::new().with_conversation(conv.clone());
        let raw = profile
            .tools()
            .execute(RECALL_TOOL_NAME, &ctx, &format!(r#"{{"memory_id":"{id}"}}"#))
            .await;
        assert!(raw.contains("\"messages_restored\":3"), "{raw}");
        assert!(profile.is_compaction_deferred());
        assert!(!conv.messages().iter().any(|m| m.text().contains(COMPACTED_MARKER)));

        // The restored turn survives the next prepare, then is fair game.
        assert!(profile.prepare(conv.as_ref()).await.compaction.is_none());
        assert!(!profile.is_compaction_deferred());
        profile.after_response(conv.as_ref());
        assert!(profile.prepare(conv.as_ref()).await.compaction.is_some());
    }

    /// Summarizer whose first call announces itself on `started` and then
    /// parks until `release` fires.
    fn parked_summarizer(started: Arc<Notify>, release: Arc<Notify>) -> Arc<dyn Summarize> {
        let first = Arc::new(AtomicBool::new(true));
        Arc::new(FnSummarizer::new(move |_, _, _| {
            let park = first.swap(false, Ordering::SeqCst);
            let (started, release) = (started.clone(), release.clone());
            async move {
                if park {
                    started.notify_one();
                    release.notified().await;
                }
                Ok("read a big file".to_string())
            }
        }))
    }

    #[tokio::test]
    async fn recall_during_a_pass_is_not_undone() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let profile = MemoryProfile::with_store(
            config(),
            store.clone(),
            "openrouter",
            "acme/model",
            parked_summarizer(started.clone(), release.clone()),
        )
        .unwrap();
        profile.set_tool_schemas(Vec::new());

        // An earlier pass left mem_old behind as a placeholder.
        let old_turn = turn(9, 100);
        let old = MemoryEntry::new("mem_old", "c", "old work", render_placeholder("mem_old", "old work"))
            .with_original_messages(&old_turn)
            .unwrap();
        store.put(&old).unwrap();
        let conv = Arc::new(conversation());
        conv.update(&mut |m| m.insert(1, Message::assistant_text(old.placeholder.clone())));

        profile.force_compaction();
        let tools = profile.tools();
        let ctx = ToolContext::new().with_conversation(conv.clone());
        let (outcome, raw) = tokio::join!(profile.prepare(conv.as_ref()), async {
            started.notified().await;
            let raw = tools
                .execute(RECALL_TOOL_NAME, &ctx, r#"{"memory_id":"mem_old"}"#)
                .await;
            release.notify_one();
            raw
        });

        assert!(raw.contains("\"messages_restored\":3"), "{raw}");
        assert_eq!(outcome.compaction.unwrap().memory_ids().len(), 2);
        assert!(!outcome.mutated);

        let messages = conv.messages();
        assert_eq!(outcome.messages, messages);
        assert_eq!(messages[1..4], old_turn[..]);
        assert!(!messages.iter().any(|m| m.text().contains(&recall_instruction("mem_old"))));
        assert!(profile.is_compaction_deferred());
    }

    #[tokio::test]
    async fn messages_appended_during_a_pass_are_kept() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let profile = MemoryProfile::with_store(
            config(),
            Arc::new(MemoryStore::in_memory().unwrap()),
            "openrouter",
            "acme/model",
            parked_summarizer(started.clone(), release.clone()),
        )
        .unwrap();
        profile.set_tool_schemas(Vec::new());

        let conv = conversation();
        let (outcome, ()) = tokio::join!(profile.prepare(&conv), async {
            started.notified().await;
            conv.push(Message::user("late"));
            release.notify_one();
        });

        assert!(outcome.mutated);
        let messages = conv.messages();
        assert_eq!(outcome.messages, messages);
        assert!(is_compacted(&messages[1]));
        assert_eq!(messages.last(), Some(&Message::user("late")));
    }

    #[test]
    fn stats_proxy_the_store() {
        let profile = profile_with(config());
        profile
            .store()
            .put(&MemoryEntry::new("mem_1", "c", "s", "p"))
            .unwrap();
        let stats = profile.stats(5).unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.recent[0].id, "mem_1");
    }
}
