//! Conversation memory
//!
//! Defines Message and MessageRole, plus the size-capped conversation memory
//! owned by one agent session.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// Default cap on stored messages
pub const DEFAULT_MAX_MESSAGES: usize = 100;
/// Maximum characters in a single message
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// Number of trailing messages exposed as context
pub const CONTEXT_WINDOW: usize = 10;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User input
    User,
    /// Model response
    Assistant,
    /// Notes recorded by the agent itself (errors, violations)
    System,
}

/// A single message in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
    /// When the message was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }
}

/// Ordered, size-capped conversation memory
///
/// Oldest messages are evicted first once `max_messages` is exceeded.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    messages: VecDeque<Message>,
    max_messages: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages.min(DEFAULT_MAX_MESSAGES) + 1),
            max_messages,
        }
    }

    /// Append a message, evicting from the front while over capacity
    pub fn add_message(&mut self, role: MessageRole, content: impl Into<String>) -> Result<(), GuardError> {
        let content = content.into();
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(GuardError::LengthViolation {
                what: "Message",
                max: MAX_CONTENT_CHARS,
            });
        }
        self.push(Message::new(role, content));
        Ok(())
    }

    /// Re-insert a previously recorded message, keeping its timestamp
    pub fn restore(&mut self, message: Message) -> Result<(), GuardError> {
        if message.content.chars().count() > MAX_CONTENT_CHARS {
            return Err(GuardError::LengthViolation {
                what: "Message",
                max: MAX_CONTENT_CHARS,
            });
        }
        self.push(message);
        Ok(())
    }

    fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// The last (up to) `CONTEXT_WINDOW` messages, oldest first
    pub fn get_context(&self) -> Vec<&Message> {
        let start = self.messages.len().saturating_sub(CONTEXT_WINDOW);
        self.messages.range(start..).collect()
    }

    /// All retained messages, oldest first
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "Hello");

        let msg = Message::assistant("Hi there");
        assert_eq!(msg.role, MessageRole::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::system("note")).unwrap();
        assert!(json.contains("\"role\":\"system\""));
    }

    #[test]
    fn test_message_without_timestamp_deserializes() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut memory = ConversationMemory::new(100);
        for i in 1..=105 {
            memory.add_message(MessageRole::User, format!("message {}", i)).unwrap();
        }
        assert_eq!(memory.len(), 100);
        assert_eq!(memory.messages().next().unwrap().content, "message 6");
        assert_eq!(memory.messages().last().unwrap().content, "message 105");
    }

    #[test]
    fn test_oversized_content_rejected() {
        let mut memory = ConversationMemory::default();
        let err = memory
            .add_message(MessageRole::User, "x".repeat(MAX_CONTENT_CHARS + 1))
            .unwrap_err();
        assert!(matches!(err, GuardError::LengthViolation { .. }));
        assert!(memory.is_empty());

        memory
            .add_message(MessageRole::User, "x".repeat(MAX_CONTENT_CHARS))
            .unwrap();
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_context_with_few_messages() {
        let mut memory = ConversationMemory::default();
        memory.add_message(MessageRole::User, "a").unwrap();
        memory.add_message(MessageRole::Assistant, "b").unwrap();
        let context = memory.get_context();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "a");
        assert_eq!(context[1].content, "b");
    }

    fn arb_role() -> impl Strategy<Value = MessageRole> {
        prop_oneof![
            Just(MessageRole::User),
            Just(MessageRole::Assistant),
            Just(MessageRole::System),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_memory_bound_keeps_tail_in_order(
            max in 1usize..40,
            entries in prop::collection::vec((arb_role(), "[a-z0-9 ]{0,20}"), 0..100),
        ) {
            let mut memory = ConversationMemory::new(max);
            for (role, content) in &entries {
                memory.add_message(*role, content.clone()).unwrap();
            }

            prop_assert_eq!(memory.len(), entries.len().min(max));
            let start = entries.len().saturating_sub(max);
            let kept: Vec<_> = memory.messages().map(|m| (m.role, m.content.clone())).collect();
            prop_assert_eq!(kept, entries[start..].to_vec());
        }

        #[test]
        fn prop_context_is_tail(
            count in 0usize..60,
        ) {
            let mut memory = ConversationMemory::default();
            for i in 0..count {
                memory.add_message(MessageRole::User, i.to_string()).unwrap();
            }
            let before = memory.len();
            let context = memory.get_context();

            prop_assert!(context.len() <= CONTEXT_WINDOW);
            let all: Vec<&Message> = memory.messages().collect();
            prop_assert_eq!(&context[..], &all[all.len() - context.len()..]);
            prop_assert_eq!(memory.len(), before);
        }
    }
}
