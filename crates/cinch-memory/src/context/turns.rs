//! Turn segmentation: group a flat message list into assistant turns.
//!
//! A turn is one "think + act + reply" unit: the contiguous run of assistant
//! and tool messages between two user/system boundaries, closed early by an
//! assistant message without tool calls. Turns are never persisted; they are
//! recomputed from the live message list on every compaction pass.

use crate::{Message, MessageRole};

/// Inclusive index range `[start, end]` of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Turn {
    pub start: usize,
    pub end: usize,
}

impl Turn {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of messages in the turn.
    pub fn len(&self) -> usize {
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn range(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl std::fmt::Display for Turn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..={}]", self.start, self.end)
    }
}

/// Split `messages` into turns, oldest first.
///
/// User and system messages are never part of a turn and close any open one.
/// Assistant and tool messages open a turn when none is open. An assistant
/// message without tool calls is the final reply and closes the turn. A turn
/// still open at the end of the list closes at the last index.
pub fn segment_turns(messages: &[Message]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut open: Option<usize> = None;

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            MessageRole::User | MessageRole::System => {
                if let Some(start) = open.take() {
                    turns.push(Turn::new(start, i - 1));
                }
            }
            MessageRole::Assistant | MessageRole::Tool => {
                let start = *open.get_or_insert(i);
                if msg.role == MessageRole::Assistant && !msg.has_tool_calls() {
                    turns.push(Turn::new(start, i));
                    open = None;
                }
            }
        }
    }

    if let Some(start) = open {
        turns.push(Turn::new(start, messages.len() - 1));
    }

    turns
}
