//! A [`Backend`] that replays canned responses.
//!
//! Useful for exercising the chat controller without a running server: each
//! endpoint has a queue of scripted results, and every request is recorded so
//! callers can assert on what was sent.
//!
//! ```
//! use std::sync::Arc;
//! use oceanbot::{ChatController, MemoryStore, NullRenderer, ScriptedBackend, SessionStore};
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(ScriptedBackend::new().with_chat_tokens("Krill eat phytoplankton."));
//! let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
//! let controller = ChatController::new(backend.clone(), store);
//! let id = controller.new_session().unwrap();
//! controller.submit(&id, "What do krill eat?", &mut NullRenderer).await.unwrap();
//!
//! let session = controller.session(&id).unwrap();
//! assert_eq!(session.messages[1].text, "Krill eat phytoplankton.");
//! // No rename reply was scripted, so the title falls back to the reply itself.
//! assert_eq!(session.title, "Krill eat phytoplankton.");
//! assert_eq!(backend.rename_requests().len(), 1);
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::client::{Backend, TokenStream};
use crate::error::{Error, Result};
use crate::types::{ChatMessage, RenameRequest, RenameResponse, StudyRequest, StudyResponse};

/// One step of a scripted token stream.
#[derive(Debug, Clone)]
pub enum StreamStep {
    /// Yield a token.
    Token(String),
    /// Wait before continuing.
    Pause(Duration),
    /// Yield an error.
    Fail(Error),
    /// Never yield anything again.
    Hang,
}

impl StreamStep {
    /// Convenience constructor for a token step.
    pub fn token(token: impl Into<String>) -> Self {
        StreamStep::Token(token.into())
    }
}

#[derive(Default)]
struct Script {
    chats: VecDeque<Result<Vec<StreamStep>>>,
    studies: VecDeque<Result<StudyResponse>>,
    images: VecDeque<Result<String>>,
    renames: VecDeque<Result<RenameResponse>>,

    chat_histories: Vec<Vec<ChatMessage>>,
    study_requests: Vec<StudyRequest>,
    image_fetches: usize,
    rename_requests: Vec<RenameRequest>,
}

/// A backend that answers from per-endpoint queues.
///
/// An endpoint whose queue is empty fails with a connection error.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<Script>,
}

impl ScriptedBackend {
    /// Create a backend with empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a streamed chat reply.
    pub fn with_chat(self, reply: Result<Vec<StreamStep>>) -> Self {
        self.script().chats.push_back(reply);
        self
    }

    /// Queue a streamed chat reply consisting of whitespace-separated tokens.
    pub fn with_chat_tokens(self, text: &str) -> Self {
        let steps = text.split_whitespace().map(StreamStep::token).collect();
        self.with_chat(Ok(steps))
    }

    /// Queue a study-mode reply.
    pub fn with_study(self, reply: Result<StudyResponse>) -> Self {
        self.script().studies.push_back(reply);
        self
    }

    /// Queue an image reply.
    pub fn with_image(self, reply: Result<String>) -> Self {
        self.script().images.push_back(reply);
        self
    }

    /// Queue a rename reply.
    pub fn with_rename(self, reply: Result<RenameResponse>) -> Self {
        self.script().renames.push_back(reply);
        self
    }

    /// Histories submitted to the chat endpoint, in call order.
    pub fn chat_histories(&self) -> Vec<Vec<ChatMessage>> {
        self.script().chat_histories.clone()
    }

    /// Requests sent to the study endpoint, in call order.
    pub fn study_requests(&self) -> Vec<StudyRequest> {
        self.script().study_requests.clone()
    }

    /// Number of image fetches.
    pub fn image_fetches(&self) -> usize {
        self.script().image_fetches
    }

    /// Requests sent to the rename endpoint, in call order.
    pub fn rename_requests(&self) -> Vec<RenameRequest> {
        self.script().rename_requests.clone()
    }
}

fn unscripted(endpoint: &str) -> Error {
    Error::connection(format!("no scripted reply for {endpoint}"), None)
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    async fn stream_chat(&self, history: &[ChatMessage]) -> Result<TokenStream> {
        let steps = {
            let mut script = self.script();
            script.chat_histories.push(history.to_vec());
            script
                .chats
                .pop_front()
                .unwrap_or_else(|| Err(unscripted("/api/stream")))?
        };
        let tokens = stream::iter(steps).filter_map(|step| async move {
            match step {
                StreamStep::Token(token) => Some(Ok(token)),
                StreamStep::Pause(delay) => {
                    tokio::time::sleep(delay).await;
                    None
                }
                StreamStep::Fail(err) => Some(Err(err)),
                StreamStep::Hang => {
                    futures::future::pending::<()>().await;
                    None
                }
            }
        });
        Ok(Box::pin(tokens))
    }

    async fn study(&self, request: &StudyRequest) -> Result<StudyResponse> {
        let mut script = self.script();
        script.study_requests.push(request.clone());
        script
            .studies
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("/api/study")))
    }

    async fn fetch_image(&self) -> Result<String> {
        let mut script = self.script();
        script.image_fetches += 1;
        script
            .images
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("/img")))
    }

    async fn rename(&self, request: &RenameRequest) -> Result<RenameResponse> {
        let mut script = self.script();
        script.rename_requests.push(request.clone());
        script
            .renames
            .pop_front()
            .unwrap_or_else(|| Err(unscripted("/api/rename")))
    }
}
