//! Interactive terminal chat against an oceanbot backend.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a backend on localhost:5000 and keep sessions in ~/.oceanbot
//! oceanbot-chat
//!
//! # Another backend, sessions stored elsewhere, study mode for new sessions
//! oceanbot-chat --base-url http://buoy.local:5000/ --store-dir ./sessions --mode study
//!
//! # Typewriter effect and settings from a file
//! oceanbot-chat --config oceanbot.yaml --reveal-delay-ms 30
//! ```
//!
//! Type `/help` for the slash commands.  Ctrl-C while a reply is arriving
//! cancels it and keeps whatever had already been shown.  With `--verbose` the
//! client counters are written to `metrics.txt` in the store directory on exit.

use std::sync::Arc;

use arrrg::CommandLine;
use biometrics::Collector;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use oceanbot::chat::{
    ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text, parse_command,
};
use oceanbot::utils::time::format_millis;
use oceanbot::{
    ChatController, ChatMessage, ClientLogger, FileStore, GenerateOutcome, OceanBot, SessionId,
    SessionStore, StderrLogger, emit_biometrics, register_biometrics,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("oceanbot-chat [OPTIONS]");
    let config = ChatConfig::resolve(args)?;
    let collector = Collector::new();
    register_biometrics(&collector);

    let client = OceanBot::with_options(config.base_url.clone(), Some(config.timeout()))?;
    let mut renderer = PlainTextRenderer::with_color(config.use_color)
        .with_base_url(client.base_url().as_str());
    let store_dir = config.store_dir();
    let store = SessionStore::load(Box::new(FileStore::new(&store_dir)))?;
    let logger: Arc<dyn ClientLogger> = if config.verbose {
        Arc::new(StderrLogger::verbose())
    } else {
        Arc::new(StderrLogger::new())
    };
    let controller = Arc::new(
        ChatController::new(Arc::new(client), store)
            .with_reveal_delay(config.reveal_delay())
            .with_logger(logger),
    );

    let handler_controller = Arc::clone(&controller);
    ctrlc::set_handler(move || {
        handler_controller.cancel_all();
    })?;

    let mut rl = DefaultEditor::new()?;
    println!("OceanBot chat (sessions in {})", store_dir.display());
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let active = match controller.active() {
            Some(id) => id,
            None => {
                let id = controller.new_session()?;
                controller.set_mode(&id, config.mode)?;
                id
            }
        };

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(cmd) = parse_command(line) {
                    if cmd == ChatCommand::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    if let Err(err) =
                        run_command(&controller, &active, cmd, &config, &mut renderer).await
                    {
                        renderer.print_error(&err.to_string());
                    }
                    continue;
                }

                match controller.submit(&active, line, &mut renderer).await {
                    Ok(outcome) => report(outcome, &mut renderer),
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    if config.verbose {
        let path = store_dir.join("metrics.txt");
        match emit_biometrics(&collector, &path) {
            Ok(()) => eprintln!("metrics written to {}", path.display()),
            Err(err) => eprintln!("could not write metrics to {}: {err}", path.display()),
        }
    }
    Ok(())
}

async fn run_command(
    controller: &ChatController,
    active: &SessionId,
    cmd: ChatCommand,
    config: &ChatConfig,
    renderer: &mut PlainTextRenderer,
) -> oceanbot::Result<()> {
    match cmd {
        ChatCommand::New(mode) => {
            let id = controller.new_session()?;
            let mode = mode.unwrap_or(config.mode);
            controller.set_mode(&id, mode)?;
            renderer.print_info(&format!("Started a new {mode} session."));
        }
        ChatCommand::Sessions => print_sessions(controller, active),
        ChatCommand::Switch(n) => {
            let sessions = controller.sessions();
            match sessions.get(n - 1) {
                Some(session) => {
                    controller.select(&session.id)?;
                    renderer.print_info(&format!("Switched to: {}", session.display_title()));
                }
                None => renderer.print_error(&format!(
                    "No session {n}; there are {} sessions",
                    sessions.len()
                )),
            }
        }
        ChatCommand::Mode(mode) => {
            controller.set_mode(active, mode)?;
            renderer.print_info(&format!("Mode changed to: {mode}"));
        }
        ChatCommand::History => {
            if let Some(session) = controller.session(active) {
                print_history(&session.messages);
            }
        }
        ChatCommand::Title(title) => {
            controller.set_title(active, &title)?;
            renderer.print_info(&format!("Title set to: {}", title.trim()));
        }
        ChatCommand::Retry => {
            let messages = controller
                .session(active)
                .map(|s| s.messages)
                .unwrap_or_default();
            match messages.iter().rposition(ChatMessage::is_user) {
                Some(last_user) => {
                    let history = messages[..=last_user].to_vec();
                    let outcome = controller.generate(active, history, renderer).await?;
                    report(outcome, renderer);
                }
                None => renderer.print_error("Nothing to retry yet."),
            }
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {line}");
            }
        }
        ChatCommand::Quit => {}
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
    Ok(())
}

fn report(outcome: GenerateOutcome, renderer: &mut PlainTextRenderer) {
    if let GenerateOutcome::Busy = outcome {
        renderer.print_info("A reply for this session is still arriving.");
    }
}

fn print_sessions(controller: &ChatController, active: &SessionId) {
    let sessions = controller.sessions();
    println!("    Sessions:");
    for (index, session) in sessions.iter().enumerate() {
        let marker = if &session.id == active { '*' } else { ' ' };
        let when = format_millis(session.timestamp).unwrap_or_else(|| "unknown".to_string());
        let busy = if controller.is_in_flight(&session.id) {
            " (replying)"
        } else {
            ""
        };
        println!(
            "    {marker} {:>2}. {} [{}, {} messages, {when}]{busy}",
            index + 1,
            session.display_title(),
            session.mode,
            session.messages.len(),
        );
    }
}

fn print_history(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("    (no messages)");
        return;
    }
    for message in messages {
        let speaker = if message.is_user() { "You" } else { "Bot" };
        println!("    {speaker}: {}", message.text);
        for log in message.tool_logs.iter().flatten() {
            println!("      [tool: {}] {}", log.name, log.output.trim());
        }
        if let Some(url) = &message.plot_url {
            println!("      [chart: {url}]");
        }
        if message.image.is_some() {
            println!("      [image attached]");
        }
    }
}
