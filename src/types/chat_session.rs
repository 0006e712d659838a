use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ChatMode, Role, SessionId};

/// Title given to a session until one is derived from its first exchange.
pub const DEFAULT_TITLE: &str = "New Chat";

/// One independent conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSession {
    /// Identifier of the session.
    pub id: SessionId,

    /// Human-readable title.
    pub title: String,

    /// Messages in conversation order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,

    /// Conversation variant.
    #[serde(default)]
    pub mode: ChatMode,
}

impl ChatSession {
    /// Create an empty session created at `timestamp` (epoch milliseconds).
    pub fn new(id: SessionId, timestamp: i64) -> Self {
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            timestamp,
            mode: ChatMode::Chat,
        }
    }

    /// Return a copy with the message list replaced.
    pub fn with_messages(&self, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..self.clone()
        }
    }

    /// Return a copy with the message at `index` replaced.
    ///
    /// Returns `None` when `index` is out of range.
    pub fn with_message_at(&self, index: usize, message: ChatMessage) -> Option<Self> {
        if index >= self.messages.len() {
            return None;
        }
        let mut messages = self.messages.clone();
        messages[index] = message;
        Some(self.with_messages(messages))
    }

    /// Return a copy with a new title.
    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self.clone()
        }
    }

    /// Return a copy running in `mode`.
    pub fn with_mode(&self, mode: ChatMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    /// Text of the first user message, if any.
    pub fn first_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text.as_str())
    }

    /// The title shown in session lists: the title, else the start of the first user message.
    pub fn display_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        match self.first_user_text() {
            Some(text) if !text.trim().is_empty() => text.chars().take(40).collect(),
            _ => DEFAULT_TITLE.to_string(),
        }
    }
}
