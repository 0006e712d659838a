//! Incremental assembly of a model message from streamed tokens.
//!
//! A [`ResponseAssembler`] is bound to one message slot of one session.  Every
//! token replaces that message with a copy that has the token appended; the
//! previous message value is never edited in place.  Once the stream is
//! exhausted, [`ResponseAssembler::finalize`] trims the text and strips the
//! image sentinel.

use std::time::Duration;

use crate::error::Result;
use crate::store::SessionStore;
use crate::types::{ChatMessage, SessionId};

/// Marker the backend embeds in a response when a chart image is ready.
pub const SENTINEL: &str = "ANIMGT";

/// True if `text` carries the image sentinel.
pub fn contains_sentinel(text: &str) -> bool {
    text.contains(SENTINEL)
}

/// Remove every occurrence of the sentinel and collapse whitespace runs to one space.
pub fn strip_sentinel(text: &str) -> String {
    text.replace(SENTINEL, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Outcome of finalising an assembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// The final, sentinel-free text.
    pub text: String,
    /// True if the sentinel was present and an image should be fetched.
    pub wants_image: bool,
}

/// Appends tokens to one model message of one session.
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    session: SessionId,
    index: usize,
    reveal_delay: Option<Duration>,
}

impl ResponseAssembler {
    /// Create an assembler for message `index` of `session`.
    pub fn new(session: SessionId, index: usize) -> Self {
        Self {
            session,
            index,
            reveal_delay: None,
        }
    }

    /// Wait `delay` before each token is revealed.
    pub fn with_reveal_delay(mut self, delay: Option<Duration>) -> Self {
        self.reveal_delay = delay.filter(|d| !d.is_zero());
        self
    }

    /// The session being assembled into.
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Index of the message being assembled.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Per-token reveal delay, if any.
    pub fn reveal_delay(&self) -> Option<Duration> {
        self.reveal_delay
    }

    /// The message as currently stored.
    pub fn current<'a>(&self, store: &'a SessionStore) -> Result<&'a ChatMessage> {
        let session = store.require(&self.session)?;
        session.messages.get(self.index).ok_or_else(|| {
            crate::Error::not_found(
                "message being assembled has disappeared",
                Some("message".to_string()),
                Some(self.index.to_string()),
            )
        })
    }

    /// Append one token and one separator to the message.
    pub fn apply(&self, store: &mut SessionStore, token: &str) -> Result<()> {
        let updated = self.current(store)?.with_token(token);
        store.replace_message(&self.session, self.index, updated)
    }

    /// Overwrite the message with a fully formed one, as study mode does.
    pub fn set(&self, store: &mut SessionStore, message: ChatMessage) -> Result<()> {
        store.replace_message(&self.session, self.index, message)
    }

    /// Trim the finished text and strip the sentinel from it.
    pub fn finalize(&self, store: &mut SessionStore) -> Result<Finalized> {
        let current = self.current(store)?;
        let wants_image = contains_sentinel(&current.text);
        let (text, visible_words) = if wants_image {
            let words = current.visible_words.as_ref().map(|words| {
                words
                    .iter()
                    .map(|w| strip_sentinel(w))
                    .filter(|w| !w.is_empty())
                    .collect()
            });
            (strip_sentinel(&current.text), words)
        } else {
            (
                current.text.trim_end().to_string(),
                current.visible_words.clone(),
            )
        };
        let updated = ChatMessage {
            text: text.clone(),
            visible_words,
            ..current.clone()
        };
        store.replace_message(&self.session, self.index, updated)?;
        Ok(Finalized { text, wants_image })
    }

    /// Attach an inline image reference to the message.
    pub fn attach_image(&self, store: &mut SessionStore, image: String) -> Result<()> {
        let updated = ChatMessage {
            image: Some(image),
            ..self.current(store)?.clone()
        };
        store.replace_message(&self.session, self.index, updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (SessionStore, ResponseAssembler) {
        let mut store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let id = store.create(1).unwrap();
        store
            .replace_messages(
                &id,
                vec![ChatMessage::user("Why is the sea salty?"), ChatMessage::placeholder()],
            )
            .unwrap();
        (store, ResponseAssembler::new(id, 1))
    }

    #[test]
    fn tokens_concatenate_with_single_spaces() {
        let (mut store, assembler) = setup();
        let tokens = ["Rivers", "carry", "dissolved", "minerals."];
        for token in tokens {
            assembler.apply(&mut store, token).unwrap();
        }
        let message = assembler.current(&store).unwrap();
        assert_eq!(message.text, "Rivers carry dissolved minerals. ");
        assert_eq!(message.visible_words(), tokens);

        let finalized = assembler.finalize(&mut store).unwrap();
        assert_eq!(finalized.text, tokens.join(" "));
        assert!(!finalized.wants_image);
    }

    #[test]
    fn apply_does_not_touch_other_messages() {
        let (mut store, assembler) = setup();
        let before = store.get(assembler.session()).unwrap().messages[0].clone();
        assembler.apply(&mut store, "word").unwrap();
        assert_eq!(store.get(assembler.session()).unwrap().messages[0], before);
    }

    #[test]
    fn sentinel_is_stripped_on_finalize() {
        let (mut store, assembler) = setup();
        for token in ["A", "B", "ANIMGT", "C"] {
            assembler.apply(&mut store, token).unwrap();
        }
        let finalized = assembler.finalize(&mut store).unwrap();
        assert_eq!(finalized.text, "A B C");
        assert!(finalized.wants_image);
        let message = assembler.current(&store).unwrap();
        assert_eq!(message.text, "A B C");
        assert_eq!(message.visible_words(), ["A", "B", "C"]);
    }

    #[test]
    fn strip_sentinel_handles_all_occurrences() {
        assert_eq!(strip_sentinel("ANIMGT chart ready ANIMGT"), "chart ready");
        assert_eq!(strip_sentinel("depth.ANIMGT\n\nnext"), "depth. next");
        assert_eq!(strip_sentinel("plain   text"), "plain text");
        assert!(contains_sentinel("xxANIMGTxx"));
        assert!(!contains_sentinel("ANIMG T"));
    }

    #[test]
    fn attach_image_keeps_text() {
        let (mut store, assembler) = setup();
        assembler.apply(&mut store, "Chart").unwrap();
        assembler
            .attach_image(&mut store, "data:image/png;base64,AAAA".to_string())
            .unwrap();
        let message = assembler.current(&store).unwrap();
        assert_eq!(message.text, "Chart ");
        assert_eq!(message.image.as_deref(), Some("data:image/png;base64,AAAA"));
    }

    #[test]
    fn zero_delay_is_no_delay() {
        let assembler = ResponseAssembler::new(SessionId::from("1"), 0)
            .with_reveal_delay(Some(Duration::ZERO));
        assert_eq!(assembler.reveal_delay(), None);
    }
}
