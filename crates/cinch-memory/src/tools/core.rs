//! Tool abstraction for the memory capabilities exposed to the model.
//!
//! The [`Tool`] trait defines the interface every memory tool implements: a
//! static API definition (name, description, JSON schema) and an async
//! `execute` method. Tools are collected into a [`ToolSet`] which handles
//! dispatch, argument validation and definition export.
//!
//! Unlike general-purpose agent tools, memory tools may need to reach the
//! live conversation (recall splices messages back into it). That handle is
//! passed explicitly per call in a [`ToolContext`].

use crate::ToolDef;
use crate::context::conversation::Conversation;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Boxed future returned by [`Tool::execute`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

// ── ToolContext ────────────────────────────────────────────────────

/// Per-call scope handed to [`Tool::execute`].
///
/// Carries the live conversation of the session that issued the tool call,
/// if the caller has one to offer.
#[derive(Clone, Default)]
pub struct ToolContext {
    conversation: Option<Arc<dyn Conversation>>,
}

impl ToolContext {
    /// A context with no conversation attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the live conversation (builder pattern).
    pub fn with_conversation(mut self, conversation: Arc<dyn Conversation>) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn conversation(&self) -> Option<&Arc<dyn Conversation>> {
        self.conversation.as_ref()
    }
}

impl fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("conversation", &self.conversation.is_some())
            .finish()
    }
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Lookup { store: Arc<MemoryStore> }
///
/// impl Tool for Lookup {
///     fn definition(&self) -> ToolDef { /* ... */ }
///
///     fn execute<'a>(&'a self, _ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a> {
///         Box::pin(async move {
///             // parse args, read the store, render JSON
///             todo!()
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the LLM API.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the given raw JSON arguments string.
    ///
    /// Returns the tool result as a string. Failures are rendered into the
    /// string (memory tools use a JSON `{"status":"error",...}` object) so
    /// the model can react to them; nothing is returned as `Err`.
    fn execute<'a>(&'a self, ctx: &'a ToolContext, arguments: &'a str) -> ToolFuture<'a>;

    /// The tool's name (delegates to `definition`).
    fn name(&self) -> String {
        self.definition().function.name.clone()
    }
}

// ── ToolSet ────────────────────────────────────────────────────────

/// A collection of tools that can be dispatched by name.
///
/// # Example
///
/// ```ignore
/// let tools = ToolSet::new()
///     .with(RecallTool::new(store.clone(), gate.clone()))
///     .with_if(allow_pins, PinTool::new(store, 5));
///
/// let defs = tools.definitions();
/// let reply = tools.execute("recall_memory", &ctx, r#"{"memory_id":"mem_…"}"#).await;
/// ```
pub struct ToolSet {
    tools: HashMap<String, Box<dyn Tool>>,
    /// Whether to validate tool arguments against JSON Schema before execution.
    validate_args: bool,
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("validate_args", &self.validate_args)
            .finish()
    }
}

impl ToolSet {
    /// Create an empty tool set. Argument validation is on.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            validate_args: true,
        }
    }

    /// Enable or disable JSON Schema argument validation before execution.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Return all tool definitions for the LLM API, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call by name.
    ///
    /// Returns an error string if the tool name is unknown or the arguments
    /// fail schema validation.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, arguments: &str) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => return format!("Error: unknown tool '{name}'"),
        };

        if self.validate_args
            && let Some(error) = validate_tool_arguments(tool.as_ref(), arguments)
        {
            return error;
        }

        log_tool_call(name, arguments);
        let start = std::time::Instant::now();
        let result = tool.execute(ctx, arguments).await;
        debug!(
            "Tool {name} completed in {:.0}ms ({} bytes)",
            start.elapsed().as_secs_f64() * 1000.0,
            result.len()
        );
        trace!("Tool {name} result: {result}");
        result
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate tool arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, or `Some(error_string)` if validation fails.
/// The error string is formatted for the LLM to understand and self-correct.
pub fn validate_tool_arguments(tool: &dyn Tool, arguments: &str) -> Option<String> {
    let args_value: serde_json::Value = match serde_json::from_str(arguments) {
        Ok(v) => v,
        Err(e) => {
            return Some(format!(
                "Error: invalid JSON arguments for tool '{}': {e}. \
                 Please provide valid JSON matching the tool's parameter schema.",
                tool.name()
            ));
        }
    };

    let schema = tool.definition().function.parameters;
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(_) => return None, // If schema itself is invalid, skip validation.
    };

    let errors: Vec<String> = validator
        .iter_errors(&args_value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Error: argument validation failed for tool '{}':\n{}\n\
             Please fix the arguments and try again.",
            tool.name(),
            errors.join("\n")
        ))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.len() > 120 { "..." } else { "" }
    );
}

/// Parse raw JSON arguments into a typed struct.
///
/// The error string is ready to hand back to the model.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| {
        error_json(
            "invalid_arguments",
            None,
            &format!("invalid tool arguments: {e}"),
        )
    })
}

/// Render a value as a tool response.
pub fn to_json_response<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        error_json(
            "serialization",
            None,
            &format!("could not render response: {e}"),
        )
    })
}

/// Structured error response: `{"status":"error","error":<code>,...}`.
pub fn error_json(code: &str, memory_id: Option<&str>, message: &str) -> String {
    let mut body = serde_json::json!({
        "status": "error",
        "error": code,
        "message": message,
    });
    if let Some(id) = memory_id {
        body["memory_id"] = serde_json::Value::String(id.to_string());
    }
    body.to_string()
}

// ── Tests ──────────────────────────────────────────────────────────
