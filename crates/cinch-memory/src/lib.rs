//! Context compaction and recallable long-term memory for LLM tool-use agents.
//!
//! `cinch-memory` keeps a growing agent conversation inside the model's
//! context window. Before every model call the
//! [`ContextProfile`](agent::profile::ContextProfile) measures the
//! conversation, and when it grows past the configured threshold the
//! [`CompactionEngine`](context::compaction::CompactionEngine) summarizes the
//! oldest complete assistant turns into short placeholders. The full original
//! messages are kept in a durable [`MemoryStore`](store::MemoryStore) and can
//! be spliced back in later by the model through the `recall_memory` tool.
//!
//! # Getting started
//!
//! ```ignore
//! use cinch_memory::prelude::*;
//!
//! let config = MemoryConfig::default().with_store_path(".agents/memory.redb");
//! let summarizer = FnSummarizer::new(|_model, _system, content| async move {
//!     Ok(my_llm_call(content).await?)
//! });
//! let profile = ContextProfile::build(
//!     ProfileKind::Memory,
//!     config,
//!     "anthropic",
//!     "anthropic/claude-sonnet-4",
//!     Arc::new(summarizer),
//! )?;
//!
//! // Once per agent round:
//! let outcome = profile.prepare(&conversation).await;
//! send_to_model(&outcome.messages, &profile.tools().definitions());
//! profile.after_response(&conversation);
//! ```
//!
//! # Where to find things
//!
//! - **Turn grouping:** [`context::turns::segment_turns`].
//! - **Eviction policy:** [`context::compaction`], sized by
//!   [`context::sizing::total_actual_size`].
//! - **Storage:** [`store::MemoryStore`] on top of `redb`, with a versioned
//!   schema in [`store::schema`].
//! - **Model-facing tools:** [`tools::recall::RecallTool`] and
//!   [`tools::pin::PinTool`], dispatched through [`tools::core::ToolSet`].
//! - **Lifecycle wiring:** [`agent::profile`], configured by
//!   [`agent::config::MemoryConfig`] and observed through
//!   [`agent::events::EventHandler`].

pub mod agent;
pub mod context;
pub mod error;
pub mod prelude;
pub mod store;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::{MemoryError, Result};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default model used when no active model has been reported yet.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

/// Default characters-per-token ratio used to turn token windows into byte
/// thresholds.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types
/// and the `serde_json::Value` that the OpenAI function-calling API expects.
///
/// # Example
///
/// ```
/// use cinch_memory::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct RecallArgs {
///     memory_id: String,
/// }
///
/// let schema = json_schema_for::<RecallArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"memory_id".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation.
///
/// Absent fields are skipped on serialization, so a message that went through
/// a JSON round trip re-serializes to the same bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning / extended thinking text attached to an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a tool-result message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: MessageRole) -> Self {
        Self {
            role,
            content: None,
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::System)
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::User)
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::with_role(MessageRole::Assistant)
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::with_role(MessageRole::Assistant)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_call_id: Some(call_id.into()),
            ..Self::with_role(MessageRole::Tool)
        }
    }

    /// Attach reasoning text.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Attach a tool name (for tool-result messages).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Content text, treating `None` as empty.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// Whether this message carries tool-call requests.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// True when content, reasoning and tool calls are all absent or empty.
    pub fn is_empty_shell(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.reasoning.as_deref().is_none_or(str::is_empty)
            && !self.has_tool_calls()
    }

    /// Clear content, reasoning and tool calls, leaving an empty shell in place.
    pub fn clear(&mut self) {
        self.content = None;
        self.reasoning = None;
        self.tool_calls = None;
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    /// Create a function-calling tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionCallData {
    pub name: String,
    pub arguments: String,
}
