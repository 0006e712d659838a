//! Output rendering for streamed bot responses.
//!
//! This module provides the renderer trait the chat controller reports
//! progress through, and a plain-text implementation for terminals.

use std::io::{self, Stdout, Write};

use crate::types::ToolLog;

/// ANSI escape code for dim text (used for tool logs).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for tool names and titles).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for charts and images).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering a bot response as it is assembled.
///
/// The chat controller calls these in order: `start_response`, then tokens or
/// whole text, then any chart, image, or title, then `finish_response`.
pub trait Renderer: Send {
    /// Called when a response begins.
    fn start_response(&mut self) {}

    /// Called for each streamed token.
    fn print_token(&mut self, token: &str);

    /// Called with the whole text of a non-streamed response.
    fn print_text(&mut self, text: &str) {
        self.print_token(text);
    }

    /// Called for each tool the backend reports having run.
    fn print_tool_log(&mut self, log: &ToolLog) {
        _ = log;
    }

    /// Called with the server path of a generated chart.
    fn print_chart(&mut self, url: &str) {
        _ = url;
    }

    /// Called with the inline reference of a fetched image.
    fn print_image(&mut self, reference: &str) {
        _ = reference;
    }

    /// Called when the session received a new title.
    fn print_title(&mut self, title: &str) {
        _ = title;
    }

    /// Called when the response failed.
    fn print_error(&mut self, error: &str);

    /// Called for informational messages.
    fn print_info(&mut self, info: &str);

    /// Called when a response completes.
    fn finish_response(&mut self) {}

    /// Called when a response was cancelled.
    fn print_interrupted(&mut self) {}
}

/// A renderer that prints nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn print_token(&mut self, _: &str) {}

    fn print_error(&mut self, _: &str) {}

    fn print_info(&mut self, _: &str) {}
}

/// Plain text renderer with optional ANSI styling.
///
/// This renderer outputs text directly to stdout with optional
/// ANSI escape codes for tool logs, charts, and errors.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    base_url: Option<String>,
    mid_line: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            base_url: None,
            mid_line: false,
        }
    }

    /// Resolve chart paths against `base_url` when printing them.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    fn styled(&self, color: &str, text: &str) -> String {
        if self.use_color {
            format!("{color}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self) {
        print!("Bot: ");
        self.mid_line = true;
        self.flush();
    }

    fn print_token(&mut self, token: &str) {
        print!("{token} ");
        self.mid_line = true;
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        print!("{text}");
        self.mid_line = !text.ends_with('\n');
        self.flush();
    }

    fn print_tool_log(&mut self, log: &ToolLog) {
        self.end_line();
        let name = self.styled(ANSI_CYAN, &format!("[tool: {}]", log.name));
        let output = self.styled(ANSI_DIM, log.output.trim());
        println!("{name} {output}");
    }

    fn print_chart(&mut self, url: &str) {
        self.end_line();
        let location = match &self.base_url {
            Some(base) if url.starts_with('/') => {
                format!("{}{}", base.trim_end_matches('/'), url)
            }
            _ => url.to_string(),
        };
        println!("{}", self.styled(ANSI_GREEN, &format!("[chart: {location}]")));
    }

    fn print_image(&mut self, reference: &str) {
        self.end_line();
        let kind = reference
            .strip_prefix("data:")
            .and_then(|rest| rest.split(';').next())
            .unwrap_or("image");
        let size = reference.len().saturating_sub(reference.find(',').map_or(0, |i| i + 1));
        println!(
            "{}",
            self.styled(
                ANSI_GREEN,
                &format!("[image: {kind}, {size} base64 characters]")
            )
        );
    }

    fn print_title(&mut self, title: &str) {
        self.end_line();
        println!("{}", self.styled(ANSI_CYAN, &format!("[title: {title}]")));
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        println!("{info}");
    }

    fn finish_response(&mut self) {
        self.end_line();
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_line();
        println!("[interrupted]");
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
        assert_eq!(renderer.styled(ANSI_RED, "x"), "x");
    }

    #[test]
    fn styled_wraps_in_escape_codes() {
        let renderer = PlainTextRenderer::new();
        assert_eq!(renderer.styled(ANSI_CYAN, "t"), "\x1b[36mt\x1b[0m");
    }
}
