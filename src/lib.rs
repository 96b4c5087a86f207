pub mod bridge;
pub mod constants;
pub mod controller;
pub mod correction_channel;
pub mod error_log;
pub mod extractor;
pub mod feedback;
pub mod llm_interaction;
pub mod prompts;
pub mod renderer;
pub mod search;
pub mod validator;
pub mod web_server;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One `{role, content}` turn as the generation endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub timestamp: DateTime<Local>,
    pub role: Role,
    pub text: String,
    /// Set once the text was replaced after a failed validation/feedback cycle.
    pub is_regenerated: bool,
    /// Weak reference into the error log; the log owns the record.
    pub error_record_id: Option<Uuid>,
}

impl ChatMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            role,
            text: text.into(),
            is_regenerated: false,
            error_record_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// The visible chat history plus the hidden preamble sent ahead of it.
#[derive(Debug, Clone)]
pub struct Conversation {
    preamble: Vec<WireMessage>,
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(prompts::preamble())
    }
}

impl Conversation {
    pub fn new(preamble: Vec<WireMessage>) -> Self {
        Self {
            preamble,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Replaces the message at `index` in place. Returns false if the index is gone.
    pub fn replace(&mut self, index: usize, message: ChatMessage) -> bool {
        match self.messages.get_mut(index) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    /// Preamble followed by user/assistant turns. System-role chat entries are
    /// local notices and never reach the model.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        let mut wire = self.preamble.clone();
        wire.extend(
            self.messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| WireMessage::new(m.role, m.text.clone())),
        );
        wire
    }
}
