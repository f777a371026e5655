//! Configuration for the memory profile.
//!
//! Thresholds are configured as fractions of the active model's context
//! window and resolved to absolute byte counts with [`Thresholds::resolve`].
//! Everything has a default, so an empty config file is valid:
//!
//! ```ignore
//! let config = MemoryConfig::default()
//!     .with_conversation_threshold(0.5)
//!     .with_protected_recent(4)
//!     .with_store_path(".agents/memory.redb");
//! config.validate()?;
//! ```

use crate::context::sizing::threshold_bytes;
use crate::context::summarizer::SUMMARIZATION_PROMPT;
use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Context window used for models that aren't recognised.
pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Memory profile settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Fraction of the context window that caps summarizer input for one turn.
    pub message_threshold_fraction: f64,
    /// Fraction of the context window above which compaction runs.
    pub conversation_threshold_fraction: f64,
    /// Trailing messages never compacted.
    pub protected_recent: usize,
    /// Maximum simultaneously pinned entries.
    pub max_pins: usize,
    /// System instruction sent with every summarization call.
    pub summarization_prompt: String,
    /// Model used for summaries. `None` uses the active model.
    pub summarization_model: Option<String>,
    /// Location of the redb store. Fixed for the life of a profile.
    pub store_path: PathBuf,
    /// Overrides the model lookup in [`context_window_for_model`].
    pub context_window_tokens: Option<usize>,
    /// Compaction events kept in memory.
    pub history_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            message_threshold_fraction: 0.10,
            conversation_threshold_fraction: 0.60,
            protected_recent: 2,
            max_pins: 5,
            summarization_prompt: SUMMARIZATION_PROMPT.to_string(),
            summarization_model: None,
            store_path: PathBuf::from(".agents/memory.redb"),
            context_window_tokens: None,
            history_capacity: 50,
        }
    }
}

impl MemoryConfig {
    pub fn with_message_threshold(mut self, fraction: f64) -> Self {
        self.message_threshold_fraction = fraction;
        self
    }

    pub fn with_conversation_threshold(mut self, fraction: f64) -> Self {
        self.conversation_threshold_fraction = fraction;
        self
    }

    pub fn with_protected_recent(mut self, n: usize) -> Self {
        self.protected_recent = n;
        self
    }

    pub fn with_max_pins(mut self, max_pins: usize) -> Self {
        self.max_pins = max_pins;
        self
    }

    pub fn with_summarization_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.summarization_prompt = prompt.into();
        self
    }

    pub fn with_summarization_model(mut self, model: impl Into<String>) -> Self {
        self.summarization_model = Some(model.into());
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window_tokens = Some(tokens);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Reject settings the profile can't run with.
    pub fn validate(&self) -> Result<()> {
        let in_range = |f: f64| f > 0.0 && f <= 1.0;
        if !in_range(self.conversation_threshold_fraction) {
            return Err(invalid(format!(
                "conversation_threshold_fraction must be in (0, 1], got {}",
                self.conversation_threshold_fraction
            )));
        }
        if !in_range(self.message_threshold_fraction) {
            return Err(invalid(format!(
                "message_threshold_fraction must be in (0, 1], got {}",
                self.message_threshold_fraction
            )));
        }
        if self.message_threshold_fraction > self.conversation_threshold_fraction {
            return Err(invalid(format!(
                "message_threshold_fraction ({}) exceeds conversation_threshold_fraction ({})",
                self.message_threshold_fraction, self.conversation_threshold_fraction
            )));
        }
        if self.max_pins == 0 {
            return Err(invalid("max_pins must be at least 1".into()));
        }
        if self.summarization_prompt.trim().is_empty() {
            return Err(invalid("summarization_prompt is empty".into()));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(invalid("store_path is empty".into()));
        }
        if self.context_window_tokens == Some(0) {
            return Err(invalid("context_window_tokens must be positive".into()));
        }
        Ok(())
    }

    /// Context window for `model`, honoring the configured override.
    pub fn context_window(&self, provider: &str, model: &str) -> usize {
        self.context_window_tokens
            .unwrap_or_else(|| context_window_for_model(provider, model))
    }
}

fn invalid(message: String) -> MemoryError {
    MemoryError::ConfigInvalid(message)
}

/// Absolute byte thresholds for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Cap on summarizer input per turn.
    pub message_bytes: usize,
    /// Request size above which compaction runs.
    pub conversation_bytes: usize,
    pub context_window_tokens: usize,
}

impl Thresholds {
    pub fn resolve(config: &MemoryConfig, provider: &str, model: &str) -> Self {
        let window = config.context_window(provider, model);
        Self {
            message_bytes: threshold_bytes(config.message_threshold_fraction, window),
            conversation_bytes: threshold_bytes(config.conversation_threshold_fraction, window),
            context_window_tokens: window,
        }
    }
}

/// Known context windows (tokens) by model family.
///
/// Matches on the model name with any `vendor/` routing prefix removed, so
/// `"anthropic/claude-sonnet-4"` and `"claude-sonnet-4"` resolve the same.
/// `provider` is consulted only for local runtimes whose model names say
/// nothing about the window.
pub fn context_window_for_model(provider: &str, model: &str) -> usize {
    let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();

    if name.starts_with("claude") {
        200_000
    } else if name.starts_with("gemini") {
        1_000_000
    } else if name.starts_with("gpt-4.1") {
        1_047_576
    } else if name.starts_with("gpt-5") || name.starts_with("o3") || name.starts_with("o4") {
        400_000
    } else if name.starts_with("gpt-4o") || name.starts_with("gpt-4-turbo") {
        128_000
    } else if name.starts_with("deepseek") {
        64_000
    } else if name.starts_with("glm-5") || name.starts_with("glm-4.6") {
        200_000
    } else if name.starts_with("kimi-k2") || name.starts_with("qwen3") {
        256_000
    } else if provider.eq_ignore_ascii_case("ollama") {
        32_000
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}
