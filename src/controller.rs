//! The chat controller: one response state machine per session.
//!
//! A request moves a session from idle through requesting, streaming, and
//! finalizing back to idle.  The controller owns the [`SessionStore`] and a
//! transient map of in-flight requests; at most one request per session is in
//! flight, and a cancelled request never mutates the store again.
//!
//! Store mutations happen under a short lock that is never held across an
//! `.await`.  Cancellation takes the same lock, so a request either observes
//! the cancellation before mutating or completes its mutation before the
//! cancellation lands.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::assembler::{Finalized, ResponseAssembler};
use crate::client::Backend;
use crate::client_logger::{ClientLogger, NullLogger};
use crate::error::{Error, Result};
use crate::observability::{
    CONTROLLER_BUSY_REJECTIONS, CONTROLLER_CANCELLATIONS, CONTROLLER_FAILURES,
    CONTROLLER_GENERATIONS, CONTROLLER_RESPONSE_DURATION, IMAGE_FETCH_FAILURES, SENTINEL_HITS,
    TITLE_FALLBACKS,
};
use crate::render::Renderer;
use crate::store::SessionStore;
use crate::title::{TitleSource, derive_title, should_derive_title};
use crate::types::{
    ChatMessage, ChatMode, ChatSession, DEFAULT_TITLE, SessionId, StudyRequest, StudyResponse,
};
use crate::utils::time::now_millis;

/// Text used when a study-mode answer arrives without any.
pub const EMPTY_STUDY_RESPONSE: &str = "Chart generated successfully!";

/// How a call to [`ChatController::generate`] ended.
#[derive(Debug, Clone)]
pub enum GenerateOutcome {
    /// The response was assembled and stored.
    Completed {
        /// The final model message.
        message: ChatMessage,
        /// The title derived for the session, if this was its first exchange.
        title: Option<String>,
    },
    /// The request failed; an error message was appended to the session.
    Failed(Error),
    /// The request was cancelled; the session was left as it was at the abort.
    Cancelled,
    /// Another request for the session was already in flight; nothing changed.
    Busy,
}

impl GenerateOutcome {
    /// True if the response completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, GenerateOutcome::Completed { .. })
    }
}

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

/// Releases an in-flight registration on every exit path.
struct Registration<'a> {
    in_flight: &'a Mutex<HashMap<SessionId, InFlight>>,
    id: SessionId,
    generation: u64,
    token: CancellationToken,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // A cancelled request may have been replaced by a newer one.
        if in_flight.get(&self.id).map(|f| f.generation) == Some(self.generation) {
            in_flight.remove(&self.id);
        }
    }
}

/// Owns the sessions and drives bot responses into them.
pub struct ChatController {
    backend: Arc<dyn Backend>,
    store: Mutex<SessionStore>,
    in_flight: Mutex<HashMap<SessionId, InFlight>>,
    next_generation: AtomicU64,
    active: Mutex<Option<SessionId>>,
    reveal_delay: Option<Duration>,
    logger: Arc<dyn ClientLogger>,
}

impl ChatController {
    /// Create a controller over a loaded store.  The first session becomes active.
    pub fn new(backend: Arc<dyn Backend>, store: SessionStore) -> Self {
        let active = store.sessions().first().map(|s| s.id.clone());
        Self {
            backend,
            store: Mutex::new(store),
            in_flight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            active: Mutex::new(active),
            reveal_delay: None,
            logger: Arc::new(NullLogger),
        }
    }

    /// Wait `delay` before revealing each streamed token.
    pub fn with_reveal_delay(mut self, delay: Option<Duration>) -> Self {
        self.reveal_delay = delay;
        self
    }

    /// Report tokens, responses, and swallowed failures to `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = logger;
        self
    }

    fn lock_store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<SessionId, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<SessionId>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    ///////////////////////////////////////// Sessions /////////////////////////////////////////

    /// A snapshot of all sessions, most recent first.
    pub fn sessions(&self) -> Vec<ChatSession> {
        self.lock_store().sessions().to_vec()
    }

    /// A snapshot of one session.
    pub fn session(&self, id: &SessionId) -> Option<ChatSession> {
        self.lock_store().get(id).cloned()
    }

    /// Create a new session, put it first, and make it active.
    pub fn new_session(&self) -> Result<SessionId> {
        let id = self.lock_store().create(now_millis())?;
        *self.lock_active() = Some(id.clone());
        Ok(id)
    }

    /// Make `id` the active session.
    pub fn select(&self, id: &SessionId) -> Result<()> {
        self.lock_store().require(id)?;
        *self.lock_active() = Some(id.clone());
        Ok(())
    }

    /// The active session, if any.
    pub fn active(&self) -> Option<SessionId> {
        self.lock_active().clone()
    }

    /// Switch a session between chat and study mode.
    pub fn set_mode(&self, id: &SessionId, mode: ChatMode) -> Result<()> {
        self.lock_store().set_mode(id, mode)
    }

    /// Give a session a title by hand.
    pub fn set_title(&self, id: &SessionId, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation(
                "title must not be empty",
                Some("title".to_string()),
            ));
        }
        self.lock_store().set_title(id, title)
    }

    ///////////////////////////////////////// Requests /////////////////////////////////////////

    /// True if a response for `id` is in flight.
    pub fn is_in_flight(&self, id: &SessionId) -> bool {
        self.lock_in_flight().contains_key(id)
    }

    /// Abort the in-flight response for `id`.  Returns false if there was none.
    pub fn cancel(&self, id: &SessionId) -> bool {
        let _store = self.lock_store();
        match self.lock_in_flight().remove(id) {
            Some(in_flight) => {
                in_flight.token.cancel();
                CONTROLLER_CANCELLATIONS.click();
                true
            }
            None => false,
        }
    }

    /// Abort every in-flight response.  Returns how many were aborted.
    pub fn cancel_all(&self) -> usize {
        let _store = self.lock_store();
        let drained: Vec<_> = self.lock_in_flight().drain().collect();
        for (_, in_flight) in &drained {
            in_flight.token.cancel();
            CONTROLLER_CANCELLATIONS.click();
        }
        drained.len()
    }

    fn register(&self, id: &SessionId) -> Option<Registration<'_>> {
        let mut in_flight = self.lock_in_flight();
        if in_flight.contains_key(id) {
            CONTROLLER_BUSY_REJECTIONS.click();
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        in_flight.insert(
            id.clone(),
            InFlight {
                generation,
                token: token.clone(),
            },
        );
        Some(Registration {
            in_flight: &self.in_flight,
            id: id.clone(),
            generation,
            token,
        })
    }

    /// Append a user message to the session and generate the reply.
    ///
    /// Returns [`GenerateOutcome::Busy`] without appending anything if a
    /// response for the session is already in flight.
    pub async fn submit(
        &self,
        id: &SessionId,
        text: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<GenerateOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation(
                "message must not be empty",
                Some("text".to_string()),
            ));
        }
        let Some(registration) = self.register(id) else {
            return Ok(GenerateOutcome::Busy);
        };
        let mut history = self.lock_store().require(id)?.messages.clone();
        history.push(ChatMessage::user(text));
        self.drive(&registration, history, renderer).await
    }

    /// Generate the model reply to `history` in session `id`.
    ///
    /// The session's messages become `history` followed by the reply.  Request
    /// failures are recorded as an error message and reported as
    /// [`GenerateOutcome::Failed`]; `Err` is returned only when the session
    /// does not exist or the store cannot be written.
    pub async fn generate(
        &self,
        id: &SessionId,
        history: Vec<ChatMessage>,
        renderer: &mut dyn Renderer,
    ) -> Result<GenerateOutcome> {
        let Some(registration) = self.register(id) else {
            return Ok(GenerateOutcome::Busy);
        };
        self.lock_store().require(id)?;
        self.drive(&registration, history, renderer).await
    }

    async fn drive(
        &self,
        registration: &Registration<'_>,
        history: Vec<ChatMessage>,
        renderer: &mut dyn Renderer,
    ) -> Result<GenerateOutcome> {
        CONTROLLER_GENERATIONS.click();
        let start = Instant::now();
        let id = &registration.id;
        let token = &registration.token;

        let mode = {
            let mut store = self.lock_store();
            let mode = store.require(id)?.mode;
            let mut placeholder = history.clone();
            placeholder.push(ChatMessage::placeholder());
            store.replace_messages(id, placeholder)?;
            mode
        };
        let assembler =
            ResponseAssembler::new(id.clone(), history.len()).with_reveal_delay(self.reveal_delay);

        renderer.start_response();
        let result = self
            .respond(token, &assembler, mode, &history, renderer)
            .await;
        CONTROLLER_RESPONSE_DURATION.add(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                renderer.finish_response();
                Ok(outcome)
            }
            Err(_) if token.is_cancelled() => {
                renderer.print_interrupted();
                Ok(GenerateOutcome::Cancelled)
            }
            Err(err) => {
                CONTROLLER_FAILURES.click();
                self.logger.log_request_error(id, &err);
                let mut failed = history;
                failed.push(ChatMessage::error(err.to_string()));
                match self.mutate(token, |store| store.replace_messages(id, failed)) {
                    Ok(()) => {
                        renderer.print_error(&err.to_string());
                        Ok(GenerateOutcome::Failed(err))
                    }
                    Err(_) if token.is_cancelled() => {
                        renderer.print_interrupted();
                        Ok(GenerateOutcome::Cancelled)
                    }
                    Err(store_err) => Err(store_err),
                }
            }
        }
    }

    /// Run `f` against the store unless the request has been cancelled.
    fn mutate<R>(
        &self,
        token: &CancellationToken,
        f: impl FnOnce(&mut SessionStore) -> Result<R>,
    ) -> Result<R> {
        let mut store = self.lock_store();
        if token.is_cancelled() {
            return Err(Error::abort("request cancelled"));
        }
        f(&mut store)
    }

    async fn respond(
        &self,
        token: &CancellationToken,
        assembler: &ResponseAssembler,
        mode: ChatMode,
        history: &[ChatMessage],
        renderer: &mut dyn Renderer,
    ) -> Result<GenerateOutcome> {
        // False when the reply text is a stand-in rather than the backend's answer.
        let answered = match mode {
            ChatMode::Chat => {
                self.stream_reply(token, assembler, history, renderer)
                    .await?;
                true
            }
            ChatMode::Study => {
                self.study_reply(token, assembler, history, renderer)
                    .await?
            }
        };
        self.finalize(token, assembler, mode, history, answered, renderer)
            .await
    }

    async fn stream_reply(
        &self,
        token: &CancellationToken,
        assembler: &ResponseAssembler,
        history: &[ChatMessage],
        renderer: &mut dyn Renderer,
    ) -> Result<()> {
        let mut tokens = cancellable(token, self.backend.stream_chat(history)).await?;
        loop {
            let next = cancellable(token, async { Ok(tokens.next().await) }).await?;
            let Some(item) = next else {
                return Ok(());
            };
            let word = item?;
            if let Some(delay) = assembler.reveal_delay() {
                cancellable(token, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            self.mutate(token, |store| assembler.apply(store, &word))?;
            self.logger.log_stream_token(assembler.session(), &word);
            renderer.print_token(&word);
        }
    }

    async fn study_reply(
        &self,
        token: &CancellationToken,
        assembler: &ResponseAssembler,
        history: &[ChatMessage],
        renderer: &mut dyn Renderer,
    ) -> Result<bool> {
        let message = history
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.text.clone())
            .unwrap_or_default();
        let StudyResponse {
            response,
            plot_url,
            tool_logs,
        } = cancellable(token, self.backend.study(&StudyRequest { message })).await?;

        let response = response.filter(|r| !r.trim().is_empty());
        let answered = response.is_some();
        let text = response.unwrap_or_else(|| EMPTY_STUDY_RESPONSE.to_string());
        let reply = ChatMessage {
            plot_url,
            tool_logs: Some(tool_logs.unwrap_or_default()),
            ..ChatMessage::model(text)
        };
        self.mutate(token, |store| assembler.set(store, reply.clone()))?;

        renderer.print_text(&reply.text);
        for log in reply.tool_logs.iter().flatten() {
            renderer.print_tool_log(log);
        }
        if let Some(url) = &reply.plot_url {
            renderer.print_chart(url);
        }
        Ok(answered)
    }

    async fn finalize(
        &self,
        token: &CancellationToken,
        assembler: &ResponseAssembler,
        mode: ChatMode,
        history: &[ChatMessage],
        answered: bool,
        renderer: &mut dyn Renderer,
    ) -> Result<GenerateOutcome> {
        let id = assembler.session();
        let Finalized { text, wants_image } =
            self.mutate(token, |store| assembler.finalize(store))?;

        if wants_image {
            SENTINEL_HITS.click();
            match cancellable(token, self.backend.fetch_image()).await {
                Ok(image) => {
                    self.mutate(token, |store| assembler.attach_image(store, image.clone()))?;
                    renderer.print_image(&image);
                }
                Err(err) if token.is_cancelled() => return Err(err),
                Err(err) => {
                    IMAGE_FETCH_FAILURES.click();
                    self.logger.log_recovered_error(id, "image fetch", &err);
                }
            }
        }

        let untitled = self
            .lock_store()
            .get(id)
            .is_some_and(|s| s.title == DEFAULT_TITLE);
        let mut title = None;
        if untitled && answered && should_derive_title(history, &text) {
            let user_text = history
                .iter()
                .find(|m| m.is_user())
                .map(|m| m.text.as_str())
                .unwrap_or_default();
            let derived = cancellable(token, async {
                Ok(derive_title(self.backend.as_ref(), user_text, &text, mode).await)
            })
            .await?;
            match &derived.source {
                TitleSource::Summarized => {}
                TitleSource::FallbackAfterEmpty => TITLE_FALLBACKS.click(),
                TitleSource::FallbackAfterError(err) => {
                    TITLE_FALLBACKS.click();
                    self.logger
                        .log_recovered_error(id, "title derivation", err);
                }
            }
            self.mutate(token, |store| store.set_title(id, derived.title.clone()))?;
            renderer.print_title(&derived.title);
            title = Some(derived.title);
        }

        let message = self.mutate(token, |store| assembler.current(store).cloned())?;
        self.logger.log_response(id, &message);
        Ok(GenerateOutcome::Completed { message, title })
    }
}

/// Await `fut` unless `token` is cancelled first.
async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::abort("request cancelled")),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedBackend, StreamStep};
    use crate::store::MemoryStore;
    use crate::types::{RenameResponse, Role, ToolLog};

    #[derive(Default)]
    struct Recorder {
        tokens: Vec<String>,
        errors: Vec<String>,
        titles: Vec<String>,
        images: usize,
        interrupted: bool,
    }

    impl Renderer for Recorder {
        fn print_token(&mut self, token: &str) {
            self.tokens.push(token.to_string());
        }

        fn print_image(&mut self, _: &str) {
            self.images += 1;
        }

        fn print_title(&mut self, title: &str) {
            self.titles.push(title.to_string());
        }

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn print_info(&mut self, _: &str) {}

        fn print_interrupted(&mut self) {
            self.interrupted = true;
        }
    }

    fn controller(backend: ScriptedBackend) -> (Arc<ChatController>, Arc<ScriptedBackend>, SessionId) {
        let backend = Arc::new(backend);
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = ChatController::new(backend.clone(), store);
        let id = controller.new_session().unwrap();
        (Arc::new(controller), backend, id)
    }

    #[tokio::test]
    async fn streamed_reply_is_assembled_and_titled() {
        let backend = ScriptedBackend::new()
            .with_chat_tokens("Seawater averages 35 grams of salt per litre.")
            .with_rename(Ok(RenameResponse {
                title: Some("Ocean Salinity".to_string()),
            }));
        let (controller, backend, id) = controller(backend);
        let mut recorder = Recorder::default();

        let outcome = controller
            .submit(&id, "How salty is the ocean?", &mut recorder)
            .await
            .unwrap();
        let GenerateOutcome::Completed { message, title } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(message.text, "Seawater averages 35 grams of salt per litre.");
        assert_eq!(title.as_deref(), Some("Ocean Salinity"));

        let session = controller.session(&id).unwrap();
        assert_eq!(session.title, "Ocean Salinity");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0], ChatMessage::user("How salty is the ocean?"));
        assert_eq!(session.messages[1].visible_words().len(), 8);
        assert_eq!(recorder.tokens.len(), 8);
        assert_eq!(recorder.titles, vec!["Ocean Salinity"]);
        assert!(!controller.is_in_flight(&id));

        let histories = backend.chat_histories();
        assert_eq!(histories, vec![vec![ChatMessage::user("How salty is the ocean?")]]);
    }

    #[tokio::test]
    async fn sentinel_triggers_one_image_fetch() {
        let backend = ScriptedBackend::new()
            .with_chat_tokens("A B ANIMGT C")
            .with_image(Ok("data:image/png;base64,AAAA".to_string()))
            .with_rename(Ok(RenameResponse { title: None }));
        let (controller, backend, id) = controller(backend);
        let mut recorder = Recorder::default();

        controller.submit(&id, "plot it", &mut recorder).await.unwrap();

        let session = controller.session(&id).unwrap();
        let reply = &session.messages[1];
        assert_eq!(reply.text, "A B C");
        assert_eq!(reply.image.as_deref(), Some("data:image/png;base64,AAAA"));
        assert_eq!(backend.image_fetches(), 1);
        assert_eq!(recorder.images, 1);
        assert_eq!(backend.rename_requests()[0].bot, "A B C");
        assert_eq!(session.title, "A B C");
    }

    #[tokio::test]
    async fn image_failure_leaves_message_without_image() {
        let backend = ScriptedBackend::new()
            .with_chat_tokens("chart ANIMGT")
            .with_image(Err(Error::api(404, Some("/img".to_string()), "missing")))
            .with_rename(Ok(RenameResponse::default()));
        let (controller, backend, id) = controller(backend);

        let outcome = controller
            .submit(&id, "plot", &mut Recorder::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        let reply = &controller.session(&id).unwrap().messages[1];
        assert_eq!(reply.text, "chart");
        assert!(reply.image.is_none());
        assert!(!reply.is_error());
        assert_eq!(backend.image_fetches(), 1);
    }

    #[tokio::test]
    async fn stream_failure_becomes_error_message() {
        let backend = ScriptedBackend::new().with_chat(Err(Error::streaming(
            "SSE connection failed",
            None,
        )));
        let (controller, backend, id) = controller(backend);
        let mut recorder = Recorder::default();

        let outcome = controller.submit(&id, "hello", &mut recorder).await.unwrap();
        assert!(matches!(outcome, GenerateOutcome::Failed(Error::Streaming { .. })));

        let session = controller.session(&id).unwrap();
        assert_eq!(session.messages.len(), 2);
        assert!(session.messages[1].is_error());
        assert_eq!(
            session.messages[1].text,
            "⚠️ Streaming error: SSE connection failed"
        );
        assert_eq!(session.title, DEFAULT_TITLE);
        assert!(backend.rename_requests().is_empty());
        assert_eq!(recorder.errors.len(), 1);
        assert!(!controller.is_in_flight(&id));
    }

    #[tokio::test]
    async fn mid_stream_failure_discards_partial_reply() {
        let backend = ScriptedBackend::new().with_chat(Ok(vec![
            StreamStep::token("partial"),
            StreamStep::Fail(Error::streaming("connection reset", None)),
        ]));
        let (controller, _, id) = controller(backend);

        controller
            .submit(&id, "hello", &mut Recorder::default())
            .await
            .unwrap();
        let messages = controller.session(&id).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].is_error());
        assert!(messages[1].visible_words.is_none());
    }

    #[tokio::test]
    async fn title_failure_uses_fallback() {
        let reply = "The Gulf Stream carries warm water from the Gulf of Mexico.";
        let backend = ScriptedBackend::new()
            .with_chat_tokens(reply)
            .with_rename(Err(Error::connection("refused", None)));
        let (controller, _, id) = controller(backend);

        let outcome = controller
            .submit(&id, "Tell me about the Gulf Stream", &mut Recorder::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(
            controller.session(&id).unwrap().title,
            "The Gulf Stream carries warm w..."
        );
    }

    #[tokio::test]
    async fn second_exchange_is_not_retitled() {
        let backend = ScriptedBackend::new()
            .with_chat_tokens("first reply")
            .with_rename(Ok(RenameResponse {
                title: Some("First".to_string()),
            }))
            .with_chat_tokens("second reply");
        let (controller, backend, id) = controller(backend);

        controller.submit(&id, "one", &mut Recorder::default()).await.unwrap();
        controller.submit(&id, "two", &mut Recorder::default()).await.unwrap();

        assert_eq!(backend.rename_requests().len(), 1);
        let session = controller.session(&id).unwrap();
        assert_eq!(session.title, "First");
        assert_eq!(session.messages.len(), 4);
        assert_eq!(backend.chat_histories()[1].len(), 3);
        assert_eq!(backend.chat_histories()[1][1].role, Role::Model);
    }

    #[tokio::test]
    async fn study_mode_applies_json_reply() {
        let backend = ScriptedBackend::new()
            .with_study(Ok(StudyResponse {
                response: Some("Here is the temperature chart.".to_string()),
                plot_url: Some("/plot".to_string()),
                tool_logs: Some(vec![ToolLog::new("analyse", "12 rows")]),
            }))
            .with_rename(Ok(RenameResponse {
                title: Some("Temperature Study".to_string()),
            }));
        let (controller, backend, id) = controller(backend);
        controller.set_mode(&id, ChatMode::Study).unwrap();

        let outcome = controller
            .submit(&id, "plot temperature by month", &mut Recorder::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());

        let session = controller.session(&id).unwrap();
        let reply = &session.messages[1];
        assert_eq!(reply.text, "Here is the temperature chart.");
        assert_eq!(reply.plot_url.as_deref(), Some("/plot"));
        assert_eq!(reply.tool_logs.as_ref().unwrap()[0].name, "analyse");
        assert_eq!(session.title, "Temperature Study");
        assert_eq!(
            backend.study_requests()[0].message,
            "plot temperature by month"
        );
        assert_eq!(backend.rename_requests()[0].mode, Some(ChatMode::Study));
        assert!(backend.chat_histories().is_empty());
    }

    #[tokio::test]
    async fn empty_study_reply_gets_default_text() {
        let backend = ScriptedBackend::new().with_study(Ok(StudyResponse::default()));
        let (controller, backend, id) = controller(backend);
        controller.set_mode(&id, ChatMode::Study).unwrap();
        controller
            .submit(&id, "bar chart of oceans", &mut Recorder::default())
            .await
            .unwrap();
        let reply = &controller.session(&id).unwrap().messages[1];
        assert_eq!(reply.text, EMPTY_STUDY_RESPONSE);
        assert_eq!(reply.tool_logs.as_deref(), Some(&[][..]));
        assert!(backend.rename_requests().is_empty());
        assert_eq!(controller.session(&id).unwrap().title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn second_request_while_in_flight_is_rejected() {
        let backend = ScriptedBackend::new().with_chat(Ok(vec![
            StreamStep::token("waiting"),
            StreamStep::Hang,
        ]));
        let (controller, backend, id) = controller(backend);

        let task = tokio::spawn({
            let controller = controller.clone();
            let id = id.clone();
            async move {
                controller
                    .submit(&id, "first", &mut Recorder::default())
                    .await
            }
        });
        while controller
            .session(&id)
            .and_then(|s| s.messages.get(1).map(|m| m.text.clone()))
            .as_deref()
            != Some("waiting ")
        {
            tokio::task::yield_now().await;
        }
        let before = controller.session(&id).unwrap();

        let outcome = controller
            .submit(&id, "second", &mut Recorder::default())
            .await
            .unwrap();
        assert!(matches!(outcome, GenerateOutcome::Busy));
        let outcome = controller
            .generate(&id, vec![ChatMessage::user("third")], &mut Recorder::default())
            .await
            .unwrap();
        assert!(matches!(outcome, GenerateOutcome::Busy));
        assert_eq!(controller.session(&id).unwrap(), before);
        assert_eq!(backend.chat_histories().len(), 1);

        assert!(controller.cancel(&id));
        assert!(matches!(task.await.unwrap().unwrap(), GenerateOutcome::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_freezes_messages_at_abort() {
        let backend = ScriptedBackend::new().with_chat_tokens("one two three four");
        let backend = Arc::new(backend);
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = Arc::new(
            ChatController::new(backend.clone(), store)
                .with_reveal_delay(Some(Duration::from_millis(50))),
        );
        let id = controller.new_session().unwrap();

        let task = tokio::spawn({
            let controller = controller.clone();
            let id = id.clone();
            async move {
                let mut recorder = Recorder::default();
                let outcome = controller.submit(&id, "count", &mut recorder).await;
                (outcome, recorder)
            }
        });

        // Tokens land at 50ms and 100ms; abort in between.
        tokio::time::sleep(Duration::from_millis(75)).await;
        let before = controller.session(&id).unwrap();
        assert_eq!(before.messages[1].text, "one ");
        assert!(controller.cancel(&id));
        assert!(!controller.is_in_flight(&id));

        let (outcome, recorder) = task.await.unwrap();
        assert!(matches!(outcome.unwrap(), GenerateOutcome::Cancelled));
        assert!(recorder.interrupted);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(controller.session(&id).unwrap(), before);
        assert!(backend.rename_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_delay_preserves_order() {
        let backend = ScriptedBackend::new()
            .with_chat_tokens("low tide high tide")
            .with_rename(Ok(RenameResponse::default()));
        let backend = Arc::new(backend);
        let store = SessionStore::load(Box::new(MemoryStore::new())).unwrap();
        let controller = ChatController::new(backend, store)
            .with_reveal_delay(Some(Duration::from_millis(50)));
        let id = controller.new_session().unwrap();
        let mut recorder = Recorder::default();

        let started = tokio::time::Instant::now();
        controller.submit(&id, "tides?", &mut recorder).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(recorder.tokens, vec!["low", "tide", "high", "tide"]);
        assert_eq!(
            controller.session(&id).unwrap().messages[1].text,
            "low tide high tide"
        );
    }

    #[tokio::test]
    async fn request_can_follow_cancellation() {
        let backend = ScriptedBackend::new()
            .with_chat(Ok(vec![StreamStep::Hang]))
            .with_chat_tokens("fresh")
            .with_rename(Ok(RenameResponse::default()));
        let (controller, _, id) = controller(backend);

        let task = tokio::spawn({
            let controller = controller.clone();
            let id = id.clone();
            async move {
                controller
                    .submit(&id, "first", &mut Recorder::default())
                    .await
            }
        });
        while !controller.is_in_flight(&id) {
            tokio::task::yield_now().await;
        }
        assert!(controller.cancel(&id));
        let outcome = controller
            .submit(&id, "again", &mut Recorder::default())
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert!(matches!(task.await.unwrap().unwrap(), GenerateOutcome::Cancelled));
        assert!(!controller.is_in_flight(&id));
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let (controller, _, _) = controller(ScriptedBackend::new());
        let err = controller
            .submit(&SessionId::from("nope"), "hi", &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!controller.is_in_flight(&SessionId::from("nope")));
    }

    #[tokio::test]
    async fn empty_submission_is_rejected() {
        let (controller, _, id) = controller(ScriptedBackend::new());
        let err = controller
            .submit(&id, "   ", &mut Recorder::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(controller.session(&id).unwrap().messages.is_empty());
    }

    #[test]
    fn new_session_becomes_active() {
        let (controller, _, first) = controller(ScriptedBackend::new());
        assert_eq!(controller.active(), Some(first.clone()));
        let second = controller.new_session().unwrap();
        assert_eq!(controller.active(), Some(second.clone()));
        assert_eq!(controller.sessions()[0].id, second);
        controller.select(&first).unwrap();
        assert_eq!(controller.active(), Some(first));
        assert!(controller.select(&SessionId::from("missing")).is_err());
    }
}
