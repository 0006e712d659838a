//! Async client and chat engine for the oceanbot ocean-science assistant.
//!
//! [`ChatController`] drives one response at a time per session against a
//! [`Backend`] (normally [`OceanBot`], the HTTP client) and persists every
//! session through a [`SessionStore`].

// Public modules
pub mod assembler;
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod controller;
pub mod error;
pub mod observability;
pub mod render;
pub mod scripted;
pub mod sse;
pub mod store;
pub mod title;
pub mod types;
pub mod utils;

// Re-exports
pub use client::{Backend, OceanBot, TokenStream};
pub use client_logger::{ClientLogger, NullLogger, StderrLogger};
pub use controller::{ChatController, GenerateOutcome};
pub use error::{Error, Result};
pub use observability::{emit_biometrics, register_biometrics};
pub use render::{NullRenderer, PlainTextRenderer, Renderer};
pub use scripted::{ScriptedBackend, StreamStep};
pub use store::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use types::*;
