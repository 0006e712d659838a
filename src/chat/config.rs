//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.  A YAML file named with
//! `--config` supplies defaults that command-line arguments override.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::ChatMode;

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Directory under `$HOME` holding the session list when no store directory is given.
const DEFAULT_STORE_DIR: &str = ".oceanbot";

/// Command-line arguments for the oceanbot-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Backend base URL.
    #[arrrg(optional, "Backend base URL (default: http://localhost:5000/)", "URL")]
    pub base_url: Option<String>,

    /// Directory the session list is stored in.
    #[arrrg(optional, "Directory for saved sessions (default: ~/.oceanbot)", "DIR")]
    pub store_dir: Option<String>,

    /// YAML configuration file.
    #[arrrg(optional, "YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Mode for newly created sessions.
    #[arrrg(optional, "Mode for new sessions: chat or study", "MODE")]
    pub mode: Option<String>,

    /// Delay before each streamed token is shown.
    #[arrrg(optional, "Delay in milliseconds before each token is shown", "MS")]
    pub reveal_delay_ms: Option<u32>,

    /// Per-request timeout.
    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECS")]
    pub timeout_secs: Option<u32>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log every streamed token to stderr.
    #[arrrg(flag, "Log streamed tokens and responses to stderr")]
    pub verbose: bool,
}

/// Resolved configuration for a chat run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Backend base URL; `None` defers to the environment and the built-in default.
    pub base_url: Option<String>,

    /// Directory the session list is stored in.
    pub store_dir: Option<PathBuf>,

    /// Mode given to sessions created by `/new`.
    pub mode: ChatMode,

    /// Delay before each streamed token is shown, in milliseconds.  Zero disables it.
    pub reveal_delay_ms: u64,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to log streamed tokens and responses to stderr.
    pub verbose: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Mode: chat
    /// - No reveal delay
    /// - Timeout: 60 seconds
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            base_url: None,
            store_dir: None,
            mode: ChatMode::Chat,
            reveal_delay_ms: 0,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            use_color: true,
            verbose: false,
        }
    }

    /// Read a configuration from a YAML file.  Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolve `args`, reading the file they name first when there is one.
    pub fn resolve(args: ChatArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        base.overlay(args)
    }

    /// Apply command-line arguments on top of this configuration.
    pub fn overlay(mut self, args: ChatArgs) -> Result<Self> {
        if let Some(base_url) = args.base_url {
            self.base_url = Some(base_url);
        }
        if let Some(dir) = args.store_dir {
            self.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(mode) = args.mode {
            self.mode = mode
                .parse::<ChatMode>()
                .map_err(|err| Error::validation(err.to_string(), Some("mode".to_string())))?;
        }
        if let Some(delay) = args.reveal_delay_ms {
            self.reveal_delay_ms = delay.into();
        }
        if let Some(timeout) = args.timeout_secs {
            self.timeout_secs = timeout.into();
        }
        if args.no_color {
            self.use_color = false;
        }
        if args.verbose {
            self.verbose = true;
        }
        Ok(self)
    }

    /// Sets the backend base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the store directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = Some(dir.into());
        self
    }

    /// Sets the mode for new sessions.
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the per-token reveal delay.
    pub fn with_reveal_delay(mut self, delay: Duration) -> Self {
        self.reveal_delay_ms = delay.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// The per-token reveal delay, if one is configured.
    pub fn reveal_delay(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.reveal_delay_ms)).filter(|d| !d.is_zero())
    }

    /// The request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The store directory, defaulting to `~/.oceanbot` or `./.oceanbot` without a home.
    pub fn store_dir(&self) -> PathBuf {
        match &self.store_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_STORE_DIR),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = Error;

    /// Applies `args` to the defaults without reading any configuration file.
    fn try_from(args: ChatArgs) -> Result<Self> {
        ChatConfig::new().overlay(args)
    }
}
