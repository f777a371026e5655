//! Pre-compaction hook for extracting durable facts.
//!
//! Before a compaction pass evicts anything, the profile hands the full
//! message list to a registered [`FactsExtractor`]. This is the last moment
//! the whole context is available, so an extractor can persist project
//! knowledge (conventions, decisions, file locations) somewhere longer-lived.
//!
//! Failures are logged and reported as a
//! [`MemoryEvent::FactsExtractionFailed`](super::events::MemoryEvent); they
//! never block compaction.

use crate::Message;
use crate::error::Result;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`FactsExtractor::extract`].
pub type FactsFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Receives the pre-compaction message set.
pub trait FactsExtractor: Send + Sync {
    fn extract<'a>(&'a self, messages: &'a [Message]) -> FactsFuture<'a>;
}

type ErasedFactsHandler =
    Box<dyn Fn(Vec<Message>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// A closure-based extractor. The closure receives an owned copy of the
/// messages so it can move them into a spawned task if it wants to.
pub struct FnFactsExtractor {
    handler: ErasedFactsHandler,
}

impl FnFactsExtractor {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let erased = move |messages: Vec<Message>| -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
            Box::pin(handler(messages))
        };
        Self {
            handler: Box::new(erased),
        }
    }
}

impl FactsExtractor for FnFactsExtractor {
    fn extract<'a>(&'a self, messages: &'a [Message]) -> FactsFuture<'a> {
        (self.handler)(messages.to_vec())
    }
}

impl fmt::Debug for FnFactsExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactsExtractor").finish_non_exhaustive()
    }
}
