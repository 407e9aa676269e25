//! Mode Conductor Core - Cognitive-Mode Dispatch for Conversational Hosts
//!
//! This crate decides, turn by turn, which cognitive mode (debugging,
//! teaching, reviewing, ...) should handle a user's utterance, switches the
//! session into that mode, and lets the mode process the turn. It has no
//! opinion about how modes produce their output and no UI dependencies.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           Host (CLI, server)                      │
//! │                 submit_turn(session, utterance)                   │
//! └────────────────────────────────┬─────────────────────────────────┘
//!                                  │
//! ┌────────────────────────────────┼─────────────────────────────────┐
//! │                        MODE CONDUCTOR CORE                        │
//! │  ┌─────────────────────────────┴──────────────────────────────┐  │
//! │  │                         Dispatcher                          │  │
//! │  │  ┌────────────┐  ┌─────────────┐  ┌──────────────────────┐ │  │
//! │  │  │ Recognizer │  │  Session    │  │  Admission / Health  │ │  │
//! │  │  │ (scoring)  │  │  Manager    │  │  (limits, breakers)  │ │  │
//! │  │  └─────┬──────┘  └──────┬──────┘  └──────────────────────┘ │  │
//! │  └────────┼────────────────┼───────────────────────────────────┘  │
//! │           └───────┬────────┘                                      │
//! │           ┌───────┴────────┐         ┌────────────────────┐      │
//! │           │  Mode Registry │         │     Event Sink     │      │
//! │           │ (Arc<dyn Mode>)│         │ (activations, ...) │      │
//! │           └────────────────┘         └────────────────────┘      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mode_conductor_core::{
//!     Dispatcher, DispatcherConfig, ModeDefinition, ModeRegistry, NullSink, SessionId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = ModeRegistry::from_definitions(
//!         vec![ModeDefinition::new("debugging", "Debugging")
//!             .with_keywords(["fix", "bug", "crash"])
//!             .with_priority(5)],
//!         None,
//!     )?;
//!
//!     let dispatcher = Dispatcher::new(
//!         Arc::new(registry),
//!         Arc::new(NullSink),
//!         DispatcherConfig::default(),
//!     );
//!
//!     let session = SessionId::generate();
//!     let result = dispatcher.submit_turn(&session, "fix this null pointer crash").await;
//!     println!("{:?} -> {}", result.mode, result.output);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`mode`]: The mode contract, definitions, keyword and default modes
//! - [`registry`]: Immutable catalogue of modes with lookup and search
//! - [`recognizer`]: Parallel, time-bounded scoring and winner selection
//! - [`session`]: Per-session state and mode transition history
//! - [`session_manager`]: Session store and the switch protocol
//! - [`admission`]: Per-mode concurrent session limits
//! - [`health`]: Per-mode circuit breakers
//! - [`dispatcher`]: End-to-end turn handling
//! - [`events`]: Observable lifecycle events and sinks
//! - [`metrics`]: Turn counters and latency histogram
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod mode;
pub mod recognizer;
pub mod registry;
pub mod session;
pub mod session_manager;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use admission::{AdmissionControl, AdmissionSnapshot};
pub use dispatcher::{Dispatcher, DispatcherConfig, TurnPhase};
pub use error::{DispatchError, RegistryError, SwitchError};
pub use events::{ChannelSink, DispatchEvent, EventSink, FallbackReason, FanoutSink, NullSink};
pub use health::{CircuitState, HealthConfig, HealthSnapshot, ModeHealthTracker};
pub use ids::{ModeId, SessionId};
pub use metrics::{LatencySummary, MetricsSnapshot};
pub use mode::{
    DefaultMode, HandleScore, KeywordMode, Mode, ModeCategory, ModeContext, ModeDefinition,
    ModeError, ModeResult,
};
pub use recognizer::{Recognition, RecognitionCandidate, Recognizer, RecognizerConfig};
pub use registry::{ModeFilter, ModeRegistry, ModeRegistryBuilder};
pub use session::{ModeTransition, Session, SessionMetadata, SessionState};
pub use session_manager::{SessionConfig, SessionManager};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConductorConfigFile, ConductorToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
