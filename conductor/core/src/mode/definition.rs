//! Mode Definitions
//!
//! The data half of a mode: what it is called, which category it belongs to,
//! which words pull utterances towards it, and the resource bounds the core
//! enforces around it. Definitions are loaded once and never mutated.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::ModeId;

/// Default bound on a single hook call, in milliseconds
pub const DEFAULT_MODE_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Category
// ============================================================================

/// Fixed set of mode categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeCategory {
    /// Step-by-step problem solving (debugging, planning)
    Reasoning,
    /// Idea generation (brainstorming, innovating)
    Creative,
    /// Inspection and evaluation (reviewing, profiling)
    Analytical,
    /// Shaping code and documents (refactoring, architecting)
    Structural,
    /// Explaining and teaching
    Learning,
    /// Conversational and supportive modes
    Social,
    /// Running, deploying, operating
    Operational,
    /// Everything else, including the default mode
    General,
}

impl Default for ModeCategory {
    fn default() -> Self {
        Self::General
    }
}

impl ModeCategory {
    /// All categories in declaration order
    pub const ALL: [ModeCategory; 8] = [
        Self::Reasoning,
        Self::Creative,
        Self::Analytical,
        Self::Structural,
        Self::Learning,
        Self::Social,
        Self::Operational,
        Self::General,
    ];

    /// Parse a category name (case-insensitive)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reasoning" => Some(Self::Reasoning),
            "creative" => Some(Self::Creative),
            "analytical" => Some(Self::Analytical),
            "structural" => Some(Self::Structural),
            "learning" => Some(Self::Learning),
            "social" => Some(Self::Social),
            "operational" => Some(Self::Operational),
            "general" => Some(Self::General),
            _ => None,
        }
    }

    /// Lower-case label, matching the serialized form
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Creative => "creative",
            Self::Analytical => "analytical",
            Self::Structural => "structural",
            Self::Learning => "learning",
            Self::Social => "social",
            Self::Operational => "operational",
            Self::General => "general",
        }
    }
}

impl fmt::Display for ModeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Definition
// ============================================================================

/// A registered mode's static description
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeDefinition {
    /// Unique id
    pub id: ModeId,

    /// Display name
    pub name: String,

    /// One-line description shown in help/status views
    #[serde(default)]
    pub description: String,

    /// Category
    #[serde(default)]
    pub category: ModeCategory,

    /// Single words that signal this mode
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Multi-word phrases that strongly signal this mode
    #[serde(default)]
    pub triggers: Vec<String>,

    /// Tie-break priority (higher wins)
    #[serde(default)]
    pub priority: i32,

    /// Bound on a single hook call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Ceiling on simultaneously active sessions (`None` = unlimited)
    #[serde(default)]
    pub max_concurrent_sessions: Option<usize>,

    /// Whether the mode takes part in recognition
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_MODE_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

impl ModeDefinition {
    /// Create an enabled definition with defaults for everything but id and name
    pub fn new(id: impl Into<ModeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: ModeCategory::General,
            keywords: Vec::new(),
            triggers: Vec::new(),
            priority: 0,
            timeout_ms: DEFAULT_MODE_TIMEOUT_MS,
            max_concurrent_sessions: None,
            enabled: true,
        }
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: ModeCategory) -> Self {
        self.category = category;
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the keyword list
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set the trigger phrase list
    #[must_use]
    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers = triggers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tie-break priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the concurrent-session ceiling
    #[must_use]
    pub fn with_max_concurrent_sessions(mut self, max: usize) -> Self {
        self.max_concurrent_sessions = Some(max);
        self
    }

    /// Enable or disable the mode
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Per-call timeout as a `Duration`
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Check the definition for load-time errors
    ///
    /// Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err("id cannot be empty".to_string());
        }
        if id.chars().any(char::is_whitespace) {
            return Err(format!("id '{id}' cannot contain whitespace"));
        }
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than zero".to_string());
        }
        if self.max_concurrent_sessions == Some(0) {
            return Err("max_concurrent_sessions must be greater than zero".to_string());
        }
        Ok(())
    }
}
