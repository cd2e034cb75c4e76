use chrono::{DateTime, Local};

use crate::gateway::{HistoryEntry, Role};

pub const GREETING: &str =
    "Hello! I'm Nexus AI. How can I assist you with your dashboard today?";

/// A single transcript entry. Fields are private so a message cannot change
/// once it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    role: Role,
    text: String,
    timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::with_timestamp(role, text, Local::now())
    }

    pub fn with_timestamp(role: Role, text: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

/// Append-only log of the messages exchanged in one chat session.
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn seeded(greeting: &str) -> Self {
        Self {
            messages: vec![Message::new(Role::Model, greeting)],
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Projects the log into the shape the gateway expects, dropping timestamps.
    pub fn to_history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .map(|message| HistoryEntry::new(message.role, message.text.clone()))
            .collect()
    }
}
