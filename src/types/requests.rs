//! Request and response bodies exchanged with the OceanBot backend.

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ChatMode, ToolLog};

/// One message of the conversation history as the backend expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    /// `user` or `assistant`.
    pub role: String,

    /// Message text.
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.wire_name().to_string(),
            content: message.text.clone(),
        }
    }
}

/// Body of `POST /api/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRequest {
    /// The conversation so far.
    pub messages: Vec<WireMessage>,
}

impl HistoryRequest {
    /// Build a request from chat messages.
    pub fn from_messages(messages: &[ChatMessage]) -> Self {
        Self {
            messages: messages.iter().map(WireMessage::from).collect(),
        }
    }
}

/// Body of `POST /api/study`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyRequest {
    /// The user's latest message.
    pub message: String,
}

/// Response of `POST /api/study`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyResponse {
    /// The answer text.
    #[serde(default)]
    pub response: Option<String>,

    /// Path of a chart the backend rendered.
    #[serde(default)]
    pub plot_url: Option<String>,

    /// Tools the backend ran while answering.
    #[serde(default)]
    pub tool_logs: Option<Vec<ToolLog>>,
}

/// Body of `POST /api/rename`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameRequest {
    /// The first user message.
    pub user: String,

    /// The first bot response.
    pub bot: String,

    /// Conversation mode, omitted for plain chat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ChatMode>,
}

/// Response of `POST /api/rename`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenameResponse {
    /// The derived title.
    #[serde(default)]
    pub title: Option<String>,
}

/// JSON form of the `GET /img` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagePayload {
    /// Base64-encoded image.
    pub image: String,
}
