use serde::{Deserialize, Serialize};

use crate::types::{Role, ToolLog};

/// Prefix placed in front of the text of error-flagged messages.
pub const ERROR_PREFIX: &str = "⚠️ ";

/// A single message in a chat session.
///
/// Field names match the JSON the session list has always been persisted with,
/// so older session files load unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,

    /// The accumulated text.
    pub text: String,

    /// Tokens revealed so far, in arrival order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_words: Option<Vec<String>>,

    /// Set when the message reports a failed request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,

    /// Tool invocations reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_logs: Option<Vec<ToolLog>>,

    /// Server-side path of a generated chart.
    #[serde(
        rename = "plot_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub plot_url: Option<String>,

    /// Inline `data:` reference of an image fetched after the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChatMessage {
    /// Create a new message with only a role and text.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            visible_words: None,
            is_error: None,
            tool_logs: None,
            plot_url: None,
            image: None,
        }
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create a model message.
    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    /// Create the empty model message that a response is assembled into.
    pub fn placeholder() -> Self {
        Self::model("")
    }

    /// Create an error-flagged model message.
    pub fn error(description: impl AsRef<str>) -> Self {
        Self {
            is_error: Some(true),
            ..Self::model(format!("{ERROR_PREFIX}{}", description.as_ref()))
        }
    }

    /// True if the message reports a failure.
    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    /// True if the user wrote the message.
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// The revealed tokens, or an empty slice if none have arrived.
    pub fn visible_words(&self) -> &[String] {
        self.visible_words.as_deref().unwrap_or(&[])
    }

    /// Return a copy with one more token appended to the text and the revealed words.
    pub fn with_token(&self, token: &str) -> Self {
        let mut text = String::with_capacity(self.text.len() + token.len() + 1);
        text.push_str(&self.text);
        text.push_str(token);
        text.push(' ');
        let mut words = self.visible_words.clone().unwrap_or_default();
        words.push(token.to_string());
        Self {
            text,
            visible_words: Some(words),
            ..self.clone()
        }
    }
}
