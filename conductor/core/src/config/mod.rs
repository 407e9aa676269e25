//! TOML Configuration File Support
//!
//! Centralised configuration loading for the dispatcher, from a TOML file at
//! `~/.config/mode-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The file lives at `$XDG_CONFIG_HOME/mode-conductor/conductor.toml`
//! (typically `~/.config/mode-conductor/conductor.toml`).
//!
//! # Example Configuration
//!
//! ```toml
//! [recognizer]
//! min_confidence = 0.2
//! score_timeout_ms = 250
//!
//! [sessions]
//! max_sessions = 5000
//! idle_timeout_secs = 1800
//! max_history = 32
//!
//! [health]
//! failure_threshold = 3
//! recovery_timeout_secs = 30
//!
//! [dispatch]
//! default_mode = "chatting"
//! max_utterance_len = 32768
//! admission_retry_candidates = 1
//!
//! [[modes]]
//! id = "debugging"
//! name = "Debugging"
//! category = "reasoning"
//! keywords = ["fix", "bug", "crash", "error"]
//! triggers = ["stack trace", "null pointer"]
//! priority = 5
//! timeout_ms = 10000
//! max_concurrent_sessions = 50
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatcher::DispatcherConfig;
use crate::health::HealthConfig;
use crate::ids::ModeId;
use crate::mode::ModeDefinition;
use crate::recognizer::RecognizerConfig;
use crate::session_manager::SessionConfig;

/// Environment variable names read by [`load_config`]
pub mod env {
    /// Recognition threshold (`f32` in `[0, 1]`)
    pub const MIN_CONFIDENCE: &str = "MODE_CONDUCTOR_MIN_CONFIDENCE";
    /// Per-scorer timeout in milliseconds
    pub const SCORE_TIMEOUT_MS: &str = "MODE_CONDUCTOR_SCORE_TIMEOUT_MS";
    /// Session store capacity
    pub const MAX_SESSIONS: &str = "MODE_CONDUCTOR_MAX_SESSIONS";
    /// Idle session timeout in seconds
    pub const IDLE_TIMEOUT_SECS: &str = "MODE_CONDUCTOR_IDLE_TIMEOUT_SECS";
    /// Default mode id
    pub const DEFAULT_MODE: &str = "MODE_CONDUCTOR_DEFAULT_MODE";
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[recognizer]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerToml {
    /// Minimum winning confidence
    pub min_confidence: Option<f32>,
    /// Per-scorer timeout in milliseconds
    pub score_timeout_ms: Option<u64>,
}

/// `[sessions]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsToml {
    /// Session store capacity
    pub max_sessions: Option<usize>,
    /// Idle timeout in seconds
    pub idle_timeout_secs: Option<u64>,
    /// Mode transitions kept per session
    pub max_history: Option<usize>,
}

/// `[health]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthToml {
    /// Consecutive failures that open a mode's circuit
    pub failure_threshold: Option<u32>,
    /// Seconds an open circuit stays open
    pub recovery_timeout_secs: Option<u64>,
}

/// `[dispatch]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Default/fallback mode id
    pub default_mode: Option<String>,
    /// Longest accepted utterance in bytes
    pub max_utterance_len: Option<usize>,
    /// Next-best candidates tried after an admission rejection
    pub admission_retry_candidates: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Recognizer section
    pub recognizer: RecognizerToml,
    /// Session store section
    pub sessions: SessionsToml,
    /// Circuit breaker section
    pub health: HealthToml,
    /// Dispatcher section
    pub dispatch: DispatchToml,
    /// Mode catalogue
    pub modes: Vec<ModeDefinition>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
///
/// Use [`load_config`] to build one with proper priority handling.
#[derive(Clone, Debug)]
pub struct ConductorConfigFile {
    /// Recognizer tuning
    pub recognizer: RecognizerConfig,
    /// Session store limits
    pub sessions: SessionConfig,
    /// Circuit breaker tuning
    pub health: HealthConfig,
    /// Default/fallback mode (`None` = built-in default)
    pub default_mode: Option<ModeId>,
    /// Longest accepted utterance in bytes
    pub max_utterance_len: usize,
    /// Next-best candidates tried after an admission rejection
    pub admission_retry_candidates: usize,
    /// Mode catalogue from the file (may be empty)
    pub modes: Vec<ModeDefinition>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ConductorConfigFile {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            recognizer: dispatcher.recognizer,
            sessions: dispatcher.sessions,
            health: dispatcher.health,
            default_mode: None,
            max_utterance_len: dispatcher.max_utterance_len,
            admission_retry_candidates: dispatcher.admission_retry_candidates,
            modes: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorConfigFile {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = self.recognizer.min_confidence;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::ValidationError(format!(
                "recognizer.min_confidence must be within [0, 1], got {min}"
            )));
        }
        if self.recognizer.score_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "recognizer.score_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_sessions must be greater than zero".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health.failure_threshold must be greater than zero".to_string(),
            ));
        }
        if self.max_utterance_len == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_utterance_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Dispatcher settings derived from this configuration
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            recognizer: self.recognizer.clone(),
            sessions: self.sessions.clone(),
            health: self.health.clone(),
            max_utterance_len: self.max_utterance_len,
            admission_retry_candidates: self.admission_retry_candidates,
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/mode-conductor/conductor.toml` or
/// `~/.config/mode-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mode-conductor").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are out of range. A missing file is not an error.
pub fn load_config() -> Result<ConductorConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if validation
/// fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorConfigFile, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(
    path: Option<PathBuf>,
    lookup: F,
) -> Result<ConductorConfigFile, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ConductorConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                modes = config.modes.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, lookup);
    config.validate()?;

    Ok(config)
}

/// Parse configuration from a TOML string (no environment, no file)
///
/// # Errors
///
/// Parse or validation failure.
pub fn parse_config(toml_content: &str) -> Result<ConductorConfigFile, ConfigError> {
    let toml_config: ConductorToml = toml::from_str(toml_content)?;
    let mut config = ConductorConfigFile::default();
    apply_toml_config(&mut config, toml_config);
    config.source = ConfigSource::File;
    config.validate()?;
    Ok(config)
}

/// Parse a standalone mode catalogue (a file of `[[modes]]` tables)
///
/// # Errors
///
/// Parse failure.
pub fn parse_modes(toml_content: &str) -> Result<Vec<ModeDefinition>, ConfigError> {
    #[derive(Deserialize)]
    struct Catalogue {
        #[serde(default)]
        modes: Vec<ModeDefinition>,
    }
    let catalogue: Catalogue = toml::from_str(toml_content)?;
    Ok(catalogue.modes)
}

fn apply_toml_config(config: &mut ConductorConfigFile, toml: ConductorToml) {
    if let Some(min) = toml.recognizer.min_confidence {
        config.recognizer.min_confidence = min;
    }
    if let Some(ms) = toml.recognizer.score_timeout_ms {
        config.recognizer.score_timeout = Duration::from_millis(ms);
    }

    if let Some(max) = toml.sessions.max_sessions {
        config.sessions.max_sessions = max;
    }
    if let Some(secs) = toml.sessions.idle_timeout_secs {
        config.sessions.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(max) = toml.sessions.max_history {
        config.sessions.max_history = max;
    }

    if let Some(threshold) = toml.health.failure_threshold {
        config.health.failure_threshold = threshold;
    }
    if let Some(secs) = toml.health.recovery_timeout_secs {
        config.health.recovery_timeout = Duration::from_secs(secs);
    }

    if let Some(mode) = toml.dispatch.default_mode {
        config.default_mode = Some(ModeId::from(mode));
    }
    if let Some(len) = toml.dispatch.max_utterance_len {
        config.max_utterance_len = len;
    }
    if let Some(n) = toml.dispatch.admission_retry_candidates {
        config.admission_retry_candidates = n;
    }

    config.modes = toml.modes;
}

fn apply_env_config<F>(config: &mut ConductorConfigFile, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let value = raw.trim().parse::<T>().ok();
        if value.is_none() {
            tracing::warn!(var = key, value = raw, "Ignoring unparseable environment variable");
        }
        value
    }

    if let Some(raw) = lookup(env::MIN_CONFIDENCE) {
        if let Some(min) = parsed::<f32>(env::MIN_CONFIDENCE, &raw) {
            config.recognizer.min_confidence = min;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup(env::SCORE_TIMEOUT_MS) {
        if let Some(ms) = parsed::<u64>(env::SCORE_TIMEOUT_MS, &raw) {
            config.recognizer.score_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup(env::MAX_SESSIONS) {
        if let Some(max) = parsed::<usize>(env::MAX_SESSIONS, &raw) {
            config.sessions.max_sessions = max;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup(env::IDLE_TIMEOUT_SECS) {
        if let Some(secs) = parsed::<u64>(env::IDLE_TIMEOUT_SECS, &raw) {
            config.sessions.idle_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(mode) = lookup(env::DEFAULT_MODE) {
        let mode = mode.trim();
        if !mode.is_empty() {
            config.default_mode = Some(ModeId::from(mode));
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`ConductorConfigFile::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Recognition threshold override
    pub min_confidence: Option<f32>,
    /// Scorer timeout override (milliseconds)
    pub score_timeout_ms: Option<u64>,
    /// Session capacity override
    pub max_sessions: Option<usize>,
    /// Idle timeout override (seconds)
    pub idle_timeout_secs: Option<u64>,
    /// Default mode override
    pub default_mode: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set recognition threshold override
    #[must_use]
    pub fn with_min_confidence(mut self, min: f32) -> Self {
        self.min_confidence = Some(min);
        self
    }

    /// Set scorer timeout override
    #[must_use]
    pub fn with_score_timeout_ms(mut self, ms: u64) -> Self {
        self.score_timeout_ms = Some(ms);
        self
    }

    /// Set session capacity override
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = Some(secs);
        self
    }

    /// Set default mode override
    #[must_use]
    pub fn with_default_mode(mut self, mode: String) -> Self {
        self.default_mode = Some(mode);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ConductorConfigFile) {
        if self.min_confidence.is_some()
            || self.score_timeout_ms.is_some()
            || self.max_sessions.is_some()
            || self.idle_timeout_secs.is_some()
            || self.default_mode.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(min) = self.min_confidence {
            config.recognizer.min_confidence = min;
        }
        if let Some(ms) = self.score_timeout_ms {
            config.recognizer.score_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_sessions {
            config.sessions.max_sessions = max;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.sessions.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(ref mode) = self.default_mode {
            config.default_mode = Some(ModeId::from(mode.as_str()));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeCategory;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = ConductorConfigFile::default();

        assert_eq!(config.recognizer.min_confidence, 0.15);
        assert_eq!(config.recognizer.score_timeout, Duration::from_millis(250));
        assert_eq!(config.sessions.max_sessions, 10_000);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.health.failure_threshold, 3);
        assert_eq!(config.max_utterance_len, 32_768);
        assert_eq!(config.admission_retry_candidates, 0);
        assert!(config.default_mode.is_none());
        assert!(config.modes.is_empty());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("mode-conductor"));
            assert!(p.to_string_lossy().ends_with("conductor.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_config(
            r#"
[recognizer]
min_confidence = 0.3
score_timeout_ms = 100

[sessions]
max_sessions = 50
idle_timeout_secs = 60
max_history = 4

[health]
failure_threshold = 5
recovery_timeout_secs = 10

[dispatch]
default_mode = "general"
max_utterance_len = 1024
admission_retry_candidates = 2

[[modes]]
id = "debugging"
name = "Debugging"
category = "reasoning"
keywords = ["fix", "bug"]
priority = 5
max_concurrent_sessions = 2

[[modes]]
id = "general"
name = "General"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.recognizer.min_confidence, 0.3);
        assert_eq!(config.recognizer.score_timeout, Duration::from_millis(100));
        assert_eq!(config.sessions.max_sessions, 50);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.sessions.max_history, 4);
        assert_eq!(config.health.failure_threshold, 5);
        assert_eq!(config.health.recovery_timeout, Duration::from_secs(10));
        assert_eq!(config.default_mode, Some(ModeId::from("general")));
        assert_eq!(config.max_utterance_len, 1024);
        assert_eq!(config.admission_retry_candidates, 2);
        assert_eq!(config.modes.len(), 2);
        assert_eq!(config.modes[0].category, ModeCategory::Reasoning);
        assert_eq!(config.modes[0].max_concurrent_sessions, Some(2));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = parse_config("[recognizer]\nmin_confidence = 0.5\n").unwrap();
        assert_eq!(config.recognizer.min_confidence, 0.5);
        assert_eq!(config.sessions.max_sessions, 10_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config_with_env(
            Some(PathBuf::from("/nonexistent/mode-conductor/conductor.toml")),
            no_env,
        )
        .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let file = write_config("[recognizer\nmin_confidence = ");
        let err = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_out_of_range_values_fail_validation() {
        let err = parse_config("[recognizer]\nmin_confidence = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = parse_config("[sessions]\nmax_sessions = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_sessions"));
    }

    // =========================================================================
    // Priority Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[recognizer]\nmin_confidence = 0.3\n");
        let config = load_config_with_env(
            Some(file.path().to_path_buf()),
            env_from(&[
                (env::MIN_CONFIDENCE, "0.4"),
                (env::MAX_SESSIONS, "12"),
                (env::DEFAULT_MODE, "general"),
            ]),
        )
        .unwrap();

        assert_eq!(config.recognizer.min_confidence, 0.4);
        assert_eq!(config.sessions.max_sessions, 12);
        assert_eq!(config.default_mode, Some(ModeId::from("general")));
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let config = load_config_with_env(
            None,
            env_from(&[(env::SCORE_TIMEOUT_MS, "soon"), (env::IDLE_TIMEOUT_SECS, "90")]),
        )
        .unwrap();
        assert_eq!(config.recognizer.score_timeout, Duration::from_millis(250));
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_cli_overrides_everything() {
        let mut config = load_config_with_env(None, env_from(&[(env::MIN_CONFIDENCE, "0.4")])).unwrap();
        ConfigOverrides::new()
            .with_min_confidence(0.6)
            .with_default_mode("focus".to_string())
            .apply(&mut config);

        assert_eq!(config.recognizer.min_confidence, 0.6);
        assert_eq!(config.default_mode, Some(ModeId::from("focus")));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = ConductorConfigFile::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_parse_mode_catalogue() {
        let modes = parse_modes(
            r#"
[[modes]]
id = "teaching"
name = "Teaching"
category = "learning"
triggers = ["explain how"]
"#,
        )
        .unwrap();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].triggers, vec!["explain how".to_string()]);
    }

    #[test]
    fn test_dispatcher_config_carries_values() {
        let config = parse_config("[dispatch]\nadmission_retry_candidates = 3\n").unwrap();
        assert_eq!(config.dispatcher_config().admission_retry_candidates, 3);
    }
}
