//! Mode Conductor - Line-Oriented Host
//!
//! Stands in for the chat application around the dispatch core: loads
//! configuration, builds the mode registry, then reads utterances from stdin
//! and prints what the active mode made of them.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults and the bundled mode catalogue
//! mode-conductor
//!
//! # With config file
//! mode-conductor --config ~/.config/mode-conductor/conductor.toml
//!
//! # Machine-readable output
//! mode-conductor --json
//!
//! # Verbose logging
//! RUST_LOG=debug mode-conductor
//! ```

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use mode_conductor_core::config::{load_config_from_path, parse_modes, ConfigOverrides};
use mode_conductor_core::{ChannelSink, DispatchEvent, Dispatcher, ModeRegistry, SessionId};

use repl::{Format, Repl};

/// Mode catalogue used when the configuration defines no modes
const BUNDLED_MODES: &str = include_str!("../modes.toml");

/// Event channel capacity
const EVENT_CAPACITY: usize = 256;

/// Mode Conductor - route each utterance to the cognitive mode that fits it
#[derive(Parser, Debug)]
#[command(name = "mode-conductor")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "MODE_CONDUCTOR_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Session id to use (generated if omitted)
    #[arg(short = 's', long, value_name = "ID")]
    session: Option<String>,

    /// Print the mode catalogue and exit
    #[arg(long)]
    list_modes: bool,

    /// Print results as JSON lines
    #[arg(long)]
    json: bool,

    /// Recognition threshold override
    #[arg(long, value_name = "CONFIDENCE")]
    min_confidence: Option<f32>,

    /// Default mode override
    #[arg(long, value_name = "MODE")]
    default_mode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "MODE_CONDUCTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging to stderr so stdout carries only conversation output
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "mode_conductor={level},mode_conductor_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Log dispatch events until every sender is gone
async fn drain_events(mut rx: mpsc::Receiver<DispatchEvent>) {
    while let Some(event) = rx.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "mode_conductor::events", kind = event.kind(), %json, "Event"),
            Err(e) => warn!(error = %e, "Failed to serialize event"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(min) = args.min_confidence {
        overrides = overrides.with_min_confidence(min);
    }
    if let Some(mode) = args.default_mode.clone() {
        overrides = overrides.with_default_mode(mode);
    }
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        source = ?config.source(),
        path = ?config.config_file_path,
        "Configuration loaded"
    );

    let modes = if config.modes.is_empty() {
        parse_modes(BUNDLED_MODES).context("Bundled mode catalogue is invalid")?
    } else {
        config.modes.clone()
    };
    let registry = ModeRegistry::from_definitions(modes, config.default_mode.clone())
        .context("Failed to build mode registry")?;

    if args.list_modes {
        for def in registry.iter().map(|m| m.definition()) {
            if args.json {
                println!("{}", serde_json::to_string(def)?);
            } else {
                println!("{:<16} {:<12} {}", def.id.as_str(), def.category.label(), def.description);
            }
        }
        return Ok(());
    }

    let (sink, rx) = ChannelSink::new(EVENT_CAPACITY);
    let events = tokio::spawn(drain_events(rx));

    let dispatcher_config = config.dispatcher_config();
    let idle_timeout = dispatcher_config.sessions.idle_timeout;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(sink),
        dispatcher_config,
    ));
    let reaper = dispatcher.sessions().spawn_idle_reaper(idle_timeout);

    let session = args
        .session
        .map_or_else(SessionId::generate, SessionId::from);
    let format = if args.json { Format::Json } else { Format::Text };

    let result = tokio::select! {
        result = Repl::new(Arc::clone(&dispatcher), session, format).run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    reaper.abort();
    // A reaper mid-eviction holds the session manager, and with it the sink
    if let Err(e) = reaper.await {
        if !e.is_cancelled() {
            warn!(error = %e, "Idle reaper failed");
        }
    }
    drop(dispatcher);
    // The sink lives inside the dispatcher; dropping it closes the channel
    if let Err(e) = events.await {
        warn!(error = %e, "Event drain task failed");
    }

    info!("Mode conductor stopped");
    result
}
