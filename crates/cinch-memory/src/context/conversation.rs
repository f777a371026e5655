//! Live conversation accessor.
//!
//! The agent loop owns the conversation. The memory subsystem reads it,
//! swaps it wholesale, or edits it in place under the writer's lock, so it
//! talks to it through the [`Conversation`] trait. [`SharedConversation`] is the ready-made
//! implementation backed by an `Arc<RwLock<Vec<Message>>>`.

use crate::Message;
use std::sync::{Arc, RwLock};

/// Read/replace access to the live message list of one agent session.
pub trait Conversation: Send + Sync {
    /// Snapshot of the current message list.
    fn messages(&self) -> Vec<Message>;

    /// Atomically replace the whole message list.
    fn replace(&self, messages: Vec<Message>);

    /// Edit the live message list in place.
    ///
    /// No other write may land between reading the list and storing the
    /// edit. The default goes through `messages` and `replace` and is only
    /// atomic if nothing else writes concurrently; implementations backed by
    /// a lock should override it.
    fn update(&self, edit: &mut dyn FnMut(&mut Vec<Message>)) {
        let mut messages = self.messages();
        edit(&mut messages);
        self.replace(messages);
    }

    fn len(&self) -> usize {
        self.messages().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe, cloneable conversation handle.
#[derive(Debug, Clone, Default)]
pub struct SharedConversation {
    inner: Arc<RwLock<Vec<Message>>>,
}

impl SharedConversation {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(messages)),
        }
    }

    /// Append a message at the end.
    pub fn push(&self, message: Message) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.push(message);
    }
}

impl Conversation for SharedConversation {
    fn messages(&self) -> Vec<Message> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn replace(&self, messages: Vec<Message>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = messages;
    }

    fn update(&self, edit: &mut dyn FnMut(&mut Vec<Message>)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        edit(&mut *guard);
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl From<Vec<Message>> for SharedConversation {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

/// Whether a message has no content, reasoning or tool calls left.
pub fn is_empty_shell(message: &Message) -> bool {
    message.is_empty_shell()
}

/// Drop every empty shell from the list. Returns the number removed.
pub fn remove_empty_shells(messages: &mut Vec<Message>) -> usize {
    let before = messages.len();
    messages.retain(|m| !m.is_empty_shell());
    before - messages.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_conversation_replace_and_push() {
        let conv = SharedConversation::new(vec![Message::user("a")]);
        let clone = conv.clone();
        clone.push(Message::assistant_text("b"));
        assert_eq!(conv.len(), 2);

        conv.replace(vec![Message::system("reset")]);
        assert_eq!(clone.messages(), vec![Message::system("reset")]);
        assert!(!clone.is_empty());
    }

    #[test]
    fn update_edits_under_the_lock() {
        let conv = SharedConversation::new(vec![Message::user("a"), Message::user("b")]);
        let mut seen = 0;
        conv.update(&mut |messages| {
            seen = messages.len();
            messages.insert(1, Message::assistant_text("between"));
        });
        assert_eq!(seen, 2);
        assert_eq!(conv.messages()[1], Message::assistant_text("between"));
        assert_eq!(conv.len(), 3);
    }

    #[test]
    fn removes_only_shells() {
        let mut shell = Message::assistant_text("gone");
        shell.clear();
        let mut messages = vec![
            Message::user("keep"),
            shell.clone(),
            Message::assistant_text("keep too"),
            shell,
        ];
        assert_eq!(remove_empty_shells(&mut messages), 2);
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !is_empty_shell(m)));
    }
}
