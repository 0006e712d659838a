use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The conversation variant a session runs in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Token-streamed conversation.
    #[default]
    Chat,

    /// One-shot JSON answers that may carry a chart and tool logs.
    Study,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Chat => write!(f, "chat"),
            ChatMode::Study => write!(f, "study"),
        }
    }
}

/// Error returned when parsing an unknown chat mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModeParseError {
    /// The string that failed to parse.
    pub invalid_value: String,
}

impl fmt::Display for ChatModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unknown chat mode: {} (expected chat or study)",
            self.invalid_value
        )
    }
}

impl std::error::Error for ChatModeParseError {}

impl FromStr for ChatMode {
    type Err = ChatModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" | "normal" => Ok(ChatMode::Chat),
            "study" => Ok(ChatMode::Study),
            _ => Err(ChatModeParseError {
                invalid_value: s.to_string(),
            }),
        }
    }
}
