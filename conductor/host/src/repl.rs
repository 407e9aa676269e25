//! Interactive Loop
//!
//! Reads lines from stdin. Lines starting with `/` are host commands; anything
//! else is submitted to the dispatcher as a turn for the current session.
//! Conversation output goes to stdout, logs go to stderr.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

use mode_conductor_core::{
    Dispatcher, ModeCategory, ModeDefinition, ModeFilter, ModeResult, SessionId,
};

/// A parsed input line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `/modes [category]`
    Modes(Option<ModeCategory>),
    /// `/search <query>`
    Search(String),
    /// `/mode`
    CurrentMode,
    /// `/stats`
    Stats,
    /// `/end`
    End,
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// Anything that is not a command
    Turn(String),
    /// A `/` line we do not understand
    Invalid(String),
}

impl Command {
    /// Parse one input line; `None` for blank lines
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Turn(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        Some(match name {
            "modes" if arg.is_empty() => Self::Modes(None),
            "modes" => match ModeCategory::parse(arg) {
                Some(category) => Self::Modes(Some(category)),
                None => Self::Invalid(format!("unknown category '{arg}'")),
            },
            "search" if arg.is_empty() => Self::Invalid("usage: /search <query>".to_string()),
            "search" => Self::Search(arg.to_string()),
            "mode" => Self::CurrentMode,
            "stats" => Self::Stats,
            "end" => Self::End,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Invalid(format!("unknown command '/{other}'")),
        })
    }
}

const HELP: &str = "\
Commands:
  /modes [category]  list modes, optionally of one category
  /search <query>    find modes by id, name, keyword or description
  /mode              show the session's active mode
  /stats             dispatch counters and turn latency
  /end               end this session and start a new one
  /quit              leave
Anything else is sent as a turn.";

/// Output format for results
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    /// Human-readable lines
    Text,
    /// One JSON document per line
    Json,
}

/// The interactive session
pub struct Repl {
    dispatcher: Arc<Dispatcher>,
    session: SessionId,
    format: Format,
    out: Stdout,
}

impl Repl {
    /// Create a loop bound to one session
    pub fn new(dispatcher: Arc<Dispatcher>, session: SessionId, format: Format) -> Self {
        Self {
            dispatcher,
            session,
            format,
            out: tokio::io::stdout(),
        }
    }

    /// Run until `/quit` or end of input
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        tracing::info!(session = %self.session, "Session started");

        while let Some(line) = lines.next_line().await? {
            let Some(command) = Command::parse(&line) else {
                continue;
            };
            if command == Command::Quit {
                break;
            }
            self.handle(command).await?;
        }

        self.dispatcher.end_session(&self.session).await;
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Turn(text) => {
                let result = self.dispatcher.submit_turn(&self.session, &text).await;
                let rendered = self.render_result(&result)?;
                self.write(&rendered).await
            }
            Command::Modes(category) => {
                let filter = category.map_or_else(ModeFilter::all, ModeFilter::category);
                let modes = self.dispatcher.list_modes(&filter);
                let rendered = self.render_modes(&modes)?;
                self.write(&rendered).await
            }
            Command::Search(query) => {
                let modes = self.dispatcher.search_modes(&query);
                let rendered = self.render_modes(&modes)?;
                self.write(&rendered).await
            }
            Command::CurrentMode => {
                let mode = self.dispatcher.current_mode(&self.session);
                let rendered = match self.format {
                    Format::Json => json!({ "session": self.session, "mode": mode }).to_string(),
                    Format::Text => match mode {
                        Some(mode) => format!("active mode: {mode}"),
                        None => "no active mode".to_string(),
                    },
                };
                self.write(&rendered).await
            }
            Command::Stats => {
                let stats = json!({
                    "metrics": self.dispatcher.metrics(),
                    "admission": self.dispatcher.admission(),
                    "health": self.dispatcher.health(),
                });
                let rendered = match self.format {
                    Format::Json => stats.to_string(),
                    Format::Text => serde_json::to_string_pretty(&stats)?,
                };
                self.write(&rendered).await
            }
            Command::End => {
                self.dispatcher.end_session(&self.session).await;
                self.session = SessionId::generate();
                tracing::info!(session = %self.session, "Session started");
                let rendered = format!("new session: {}", self.session);
                self.write(&rendered).await
            }
            Command::Help => self.write(HELP).await,
            Command::Invalid(message) => self.write(&message).await,
            Command::Quit => Ok(()),
        }
    }

    fn render_result(&self, result: &ModeResult) -> Result<String> {
        if self.format == Format::Json {
            return Ok(serde_json::to_string(result)?);
        }

        let mode = result.mode.as_ref().map_or("none", |m| m.as_str());
        let mut out = format!("[{mode} {:.2}] {}", result.confidence, result.output);
        for suggestion in &result.suggestions {
            out.push_str("\n  - ");
            out.push_str(suggestion);
        }
        if let Some(next) = &result.next_mode {
            out.push_str(&format!("\n  (suggests switching to {next})"));
        }
        Ok(out)
    }

    fn render_modes(&self, modes: &[ModeDefinition]) -> Result<String> {
        if self.format == Format::Json {
            return Ok(serde_json::to_string(modes)?);
        }
        if modes.is_empty() {
            return Ok("no matching modes".to_string());
        }
        Ok(modes
            .iter()
            .map(|m| format!("{:<16} {:<12} {}", m.id.as_str(), m.category.label(), m.description))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }
}
