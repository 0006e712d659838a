//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to manage sessions without sending messages to the backend.

use crate::types::ChatMode;

/// A parsed chat command.
///
/// These commands control the session list and are not sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start a new session, optionally in a given mode.
    New(Option<ChatMode>),

    /// List all sessions.
    Sessions,

    /// Make the session at this 1-based position in the list active.
    Switch(usize),

    /// Switch the active session between chat and study mode.
    Mode(ChatMode),

    /// Print the active session's messages.
    History,

    /// Set the active session's title.
    Title(String),

    /// Generate the last reply again.
    Retry,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use oceanbot::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/mode study").is_some());
/// assert!(parse_command("How deep is the Mariana Trench?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => match argument.map(str::parse::<ChatMode>) {
            None => ChatCommand::New(None),
            Some(Ok(mode)) => ChatCommand::New(Some(mode)),
            Some(Err(err)) => ChatCommand::Invalid(format!("/new {err}")),
        },
        "sessions" | "ls" => ChatCommand::Sessions,
        "switch" => match argument.map(str::parse::<usize>) {
            Some(Ok(n)) if n >= 1 => ChatCommand::Switch(n),
            Some(_) => ChatCommand::Invalid(
                "/switch expects a session number from /sessions".to_string(),
            ),
            None => ChatCommand::Invalid("/switch requires a session number".to_string()),
        },
        "mode" => match argument.map(str::parse::<ChatMode>) {
            Some(Ok(mode)) => ChatCommand::Mode(mode),
            Some(Err(err)) => ChatCommand::Invalid(format!("/mode {err}")),
            None => ChatCommand::Invalid("/mode requires 'chat' or 'study'".to_string()),
        },
        "history" => ChatCommand::History,
        "title" => match argument {
            Some(title) => ChatCommand::Title(title.to_string()),
            None => ChatCommand::Invalid("/title requires a title".to_string()),
        },
        "retry" => ChatCommand::Retry,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new [chat|study]      Start a new session
  /sessions              List sessions
  /switch <n>            Switch to session n from /sessions
  /mode chat|study       Change the mode of the current session
  /history               Show the current session's messages
  /title <title>         Rename the current session
  /retry                 Generate the last reply again
  /help                  Show this help message
  /quit                  Exit the chat
Press Ctrl-C while a reply is arriving to cancel it."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_new() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New(None)));
        assert_eq!(
            parse_command("/NEW study"),
            Some(ChatCommand::New(Some(ChatMode::Study)))
        );
        assert!(matches!(
            parse_command("/new lecture"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("lecture")
        ));
    }

    #[test]
    fn parse_switch() {
        assert_eq!(parse_command("/switch 2"), Some(ChatCommand::Switch(2)));
        assert!(matches!(
            parse_command("/switch 0"),
            Some(ChatCommand::Invalid(_))
        ));
        assert!(matches!(
            parse_command("/switch two"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("expects")
        ));
        assert!(matches!(
            parse_command("/switch"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
    }

    #[test]
    fn parse_mode() {
        assert_eq!(
            parse_command("/mode study"),
            Some(ChatCommand::Mode(ChatMode::Study))
        );
        assert_eq!(
            parse_command("/mode chat"),
            Some(ChatCommand::Mode(ChatMode::Chat))
        );
        assert!(matches!(
            parse_command("/mode"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_title() {
        assert_eq!(
            parse_command("/title  Coral Bleaching  "),
            Some(ChatCommand::Title("Coral Bleaching".to_string()))
        );
        assert!(matches!(
            parse_command("/title"),
            Some(ChatCommand::Invalid(_))
        ));
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse_command("/sessions"), Some(ChatCommand::Sessions));
        assert_eq!(parse_command("/ls"), Some(ChatCommand::Sessions));
        assert_eq!(parse_command("/history"), Some(ChatCommand::History));
        assert_eq!(parse_command("/retry"), Some(ChatCommand::Retry));
        assert_eq!(parse_command("/?"), Some(ChatCommand::Help));
        assert!(matches!(
            parse_command("/tides"),
            Some(ChatCommand::Invalid(msg)) if msg == "Unknown command: /tides"
        ));
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("What causes tides?"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
    }

    #[test]
    fn help_text_lists_commands() {
        let help = help_text();
        for command in ["/new", "/sessions", "/switch", "/mode", "/history", "/title", "/quit"] {
            assert!(help.contains(command), "missing {command}");
        }
    }
}
