//! Terminal chat front end.
//!
//! This module provides the pieces the `oceanbot-chat` binary is built from:
//!
//! - [`config`]: CLI argument parsing, YAML configuration, and defaults
//! - [`commands`]: Slash command parsing for session control
//!
//! Rendering lives in [`crate::render`] and the response state machine in
//! [`crate::controller`].

mod commands;
mod config;

pub use crate::render::{NullRenderer, PlainTextRenderer, Renderer};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
