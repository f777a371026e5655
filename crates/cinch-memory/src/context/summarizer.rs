//! Turn summarization for context compaction.
//!
//! Every compacted turn is condensed into a summary of at most
//! [`SUMMARY_MAX_WORDS`] words by one cheap LLM call. The call itself is an
//! external capability behind the [`Summarize`] trait; this module builds its
//! input and enforces the word cap on its output.

use crate::error::{MemoryError, Result};
use crate::Message;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Hard cap on summary length, in whitespace-separated words.
pub const SUMMARY_MAX_WORDS: usize = 20;

/// Default system instruction for the summarization call.
pub const SUMMARIZATION_PROMPT: &str = "\
Summarize the following agent turn in at most 20 words. Focus on:
- What was done (tools called, files touched)
- The outcome or finding

Rules:
- Only include facts explicitly stated in the messages.
- Preserve file paths and function names verbatim where they fit.
- Output the summary text only, with no preamble or quotes.";

/// Boxed future returned by [`Summarize::summarize`].
pub type SummaryFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// The summarization capability: one short LLM completion.
///
/// Implementations should return best-effort short text. The caller enforces
/// the word cap by truncation and treats an empty result as a failure.
pub trait Summarize: Send + Sync {
    fn summarize<'a>(&'a self, model: &'a str, system: &'a str, content: &'a str)
    -> SummaryFuture<'a>;
}

/// Type-erased async handler for [`FnSummarizer`].
type ErasedSummaryHandler = Box<
    dyn Fn(String, String, String) -> Pin<Box<dyn Future<Output = Result<String>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based summarizer.
///
/// # Example
///
/// ```ignore
/// let summarizer = FnSummarizer::new(|model, system, content| async move {
///     client.quick_completion(&system, &content, &model).await
///         .map_err(MemoryError::SummarizationFailed)
/// });
/// ```
pub struct FnSummarizer {
    handler: ErasedSummaryHandler,
}

impl FnSummarizer {
    /// Wrap a closure receiving `(model, system, content)`.
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(String, String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let erased = move |model: String, system: String, content: String| -> Pin<
            Box<dyn Future<Output = Result<String>> + Send>,
        > { Box::pin(handler(model, system, content)) };
        Self {
            handler: Box::new(erased),
        }
    }
}

impl Summarize for FnSummarizer {
    fn summarize<'a>(
        &'a self,
        model: &'a str,
        system: &'a str,
        content: &'a str,
    ) -> SummaryFuture<'a> {
        (self.handler)(model.to_string(), system.to_string(), content.to_string())
    }
}

impl fmt::Debug for FnSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSummarizer").finish_non_exhaustive()
    }
}

/// Concatenate every non-empty content and reasoning fragment of a turn,
/// each labelled with its role (and tool name, if present).
pub fn aggregate_turn_text(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let label = match (&msg.role, msg.name.as_deref()) {
            (role, Some(name)) => format!("{role} {name}"),
            (role, None) => role.to_string(),
        };
        if let Some(reasoning) = msg.reasoning.as_deref().filter(|r| !r.is_empty()) {
            out.push_str(&format!("[{label} thinking]: {reasoning}\n\n"));
        }
        if let Some(content) = msg.content.as_deref().filter(|c| !c.is_empty()) {
            out.push_str(&format!("[{label}]: {content}\n\n"));
        }
    }
    out.truncate(out.trim_end().len());
    out
}

/// Whether any message in the slice has text worth summarizing.
pub fn has_summarizable_text(messages: &[Message]) -> bool {
    messages.iter().any(|m| {
        m.content.as_deref().is_some_and(|c| !c.is_empty())
            || m.reasoning.as_deref().is_some_and(|r| !r.is_empty())
    })
}

/// Keep at most `max_words` whitespace-separated words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.trim().to_string();
    }
    words[..max_words].join(" ")
}

/// Cut `text` to at most `max_bytes` bytes on a char boundary.
pub fn clip_to_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let end = text
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_bytes)
        .last()
        .unwrap_or(0);
    text.get(..end).unwrap_or("")
}

/// Run one summarization call and normalize its output.
///
/// Fails with [`MemoryError::SummarizationFailed`] on an empty result.
pub async fn summarize_turn(
    summarizer: &dyn Summarize,
    model: &str,
    system: &str,
    content: &str,
) -> Result<String> {
    let raw = summarizer.summarize(model, system, content).await?;
    let summary = truncate_words(&raw, SUMMARY_MAX_WORDS);
    if summary.is_empty() {
        return Err(MemoryError::SummarizationFailed(
            "model returned an empty summary".into(),
        ));
    }
    Ok(summary)
}
