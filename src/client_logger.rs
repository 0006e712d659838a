//! Logging trait for chat operations.
//!
//! This module provides the [`ClientLogger`] trait that lets callers capture
//! streamed tokens, finished responses, and the failures the chat controller
//! recovers from without surfacing them in the conversation.

use crate::{ChatMessage, Error, SessionId};

/// A trait for logging chat controller activity.
///
/// Every method has an empty default so implementors only override what they
/// care about.
///
/// # Example
///
/// ```rust,ignore
/// use oceanbot::{ClientLogger, Error, SessionId};
///
/// struct Stderr;
///
/// impl ClientLogger for Stderr {
///     fn log_recovered_error(&self, session: &SessionId, context: &str, error: &Error) {
///         eprintln!("[{session}] {context}: {error}");
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log a token as it is applied to a message.
    fn log_stream_token(&self, session: &SessionId, token: &str) {
        _ = (session, token);
    }

    /// Log the finished model message of a response.
    fn log_response(&self, session: &SessionId, message: &ChatMessage) {
        _ = (session, message);
    }

    /// Log a failure that was turned into an error message in the conversation.
    fn log_request_error(&self, session: &SessionId, error: &Error) {
        _ = (session, error);
    }

    /// Log a failure that was swallowed: title derivation or an image fetch.
    fn log_recovered_error(&self, session: &SessionId, context: &str, error: &Error) {
        _ = (session, context, error);
    }
}

/// A logger that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl ClientLogger for NullLogger {}

/// A logger that writes failures, and optionally responses, to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrLogger {
    verbose: bool,
}

impl StderrLogger {
    /// Create a logger that only reports failures.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Create a logger that also reports every finished response.
    pub fn verbose() -> Self {
        Self { verbose: true }
    }
}

impl ClientLogger for StderrLogger {
    fn log_response(&self, session: &SessionId, message: &ChatMessage) {
        if self.verbose {
            eprintln!(
                "[oceanbot {session}] response: {} chars, {} tokens",
                message.text.chars().count(),
                message.visible_words().len()
            );
        }
    }

    fn log_request_error(&self, session: &SessionId, error: &Error) {
        eprintln!("[oceanbot {session}] bot response error: {error}");
    }

    fn log_recovered_error(&self, session: &SessionId, context: &str, error: &Error) {
        eprintln!("[oceanbot {session}] {context} failed: {error}");
    }
}
