//! Session titles derived from the first exchange of a conversation.

use crate::client::Backend;
use crate::error::Error;
use crate::types::{ChatMessage, ChatMode, RenameRequest, Role};

/// Responses up to this many characters become the title verbatim.
pub const FALLBACK_TITLE_CHARS: usize = 30;

/// Appended to a truncated fallback title.
pub const ELLIPSIS: &str = "...";

/// True if a response to `history` should trigger title derivation.
///
/// Only the reply to the first user message of a session is summarised, and
/// only if the reply produced some text.
pub fn should_derive_title(history: &[ChatMessage], bot_text: &str) -> bool {
    let user_messages = history.iter().filter(|m| m.role == Role::User).count();
    user_messages == 1 && !bot_text.trim().is_empty()
}

/// The title used when the rename endpoint fails or answers with nothing.
pub fn fallback_title(bot_text: &str) -> String {
    if bot_text.chars().count() <= FALLBACK_TITLE_CHARS {
        bot_text.to_string()
    } else {
        let mut title: String = bot_text.chars().take(FALLBACK_TITLE_CHARS).collect();
        title.push_str(ELLIPSIS);
        title
    }
}

/// How a title was obtained.
#[derive(Debug, Clone)]
pub enum TitleSource {
    /// The rename endpoint produced it.
    Summarized,
    /// The rename endpoint failed; the error is kept for logging.
    FallbackAfterError(Error),
    /// The rename endpoint answered without a title.
    FallbackAfterEmpty,
}

/// A derived title and where it came from.
#[derive(Debug, Clone)]
pub struct DerivedTitle {
    /// The title to store.
    pub title: String,
    /// How it was obtained.
    pub source: TitleSource,
}

/// Ask `backend` to summarise the exchange, falling back to [`fallback_title`].
///
/// Never fails: a backend error is reported through [`TitleSource::FallbackAfterError`].
pub async fn derive_title(
    backend: &dyn Backend,
    user_text: &str,
    bot_text: &str,
    mode: ChatMode,
) -> DerivedTitle {
    let request = RenameRequest {
        user: user_text.to_string(),
        bot: bot_text.to_string(),
        mode: match mode {
            ChatMode::Chat => None,
            ChatMode::Study => Some(ChatMode::Study),
        },
    };
    match backend.rename(&request).await {
        Ok(response) => match response.title.map(|t| t.trim().to_string()) {
            Some(title) if !title.is_empty() => DerivedTitle {
                title,
                source: TitleSource::Summarized,
            },
            _ => DerivedTitle {
                title: fallback_title(bot_text),
                source: TitleSource::FallbackAfterEmpty,
            },
        },
        Err(err) => DerivedTitle {
            title: fallback_title(bot_text),
            source: TitleSource::FallbackAfterError(err),
        },
    }
}
