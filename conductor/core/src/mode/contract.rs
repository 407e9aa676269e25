//! Mode Contract
//!
//! The capability set every mode plugin implements: score an utterance,
//! activate for a session, deactivate, and process a turn. The core depends on
//! nothing else about a mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::definition::ModeDefinition;
use crate::ids::{ModeId, SessionId};

/// Clamp a confidence value into `[0.0, 1.0]`; NaN becomes 0.0
#[must_use]
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Per-call context handed to every hook
///
/// Built fresh by the dispatcher for each turn and never shared between turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeContext {
    /// Session the call belongs to
    pub session_id: SessionId,
    /// When the context was built
    pub timestamp: DateTime<Utc>,
    /// Turn number within the session (1-based; 0 before the first turn)
    pub turn: u64,
    /// Mode that owned the session before this turn
    pub previous_mode: Option<ModeId>,
    /// Confidence of the selection that put `previous_mode` in charge
    pub previous_confidence: Option<f32>,
}

impl ModeContext {
    /// Create a context for a session with no history
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            turn: 0,
            previous_mode: None,
            previous_confidence: None,
        }
    }

    /// Set the turn number
    #[must_use]
    pub fn with_turn(mut self, turn: u64) -> Self {
        self.turn = turn;
        self
    }

    /// Set the previously active mode and its selection confidence
    #[must_use]
    pub fn with_previous(mut self, mode: Option<ModeId>, confidence: Option<f32>) -> Self {
        self.previous_mode = mode;
        self.previous_confidence = confidence.map(clamp_confidence);
        self
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Output of `can_handle`: how well a mode fits, and why
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HandleScore {
    /// Confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Human-readable justification, most important first
    pub reasoning: Vec<String>,
}

impl HandleScore {
    /// Create a score (clamped)
    #[must_use]
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence: clamp_confidence(confidence),
            reasoning: Vec::new(),
        }
    }

    /// A zero score
    #[must_use]
    pub fn none() -> Self {
        Self::new(0.0)
    }

    /// Append a reasoning line
    #[must_use]
    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reasoning.push(reason.into());
        self
    }
}

// ============================================================================
// Result
// ============================================================================

/// Result of processing a turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeResult {
    /// Whether the mode completed the turn
    pub success: bool,
    /// Text produced for the user (or a diagnostic when `success` is false)
    pub output: String,
    /// Follow-up prompts the UI may offer
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Mode the current one recommends for the next turn
    #[serde(default)]
    pub next_mode: Option<ModeId>,
    /// Confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Mode that handled (or was attempting) the turn; filled in by the dispatcher
    #[serde(default)]
    pub mode: Option<ModeId>,
}

impl ModeResult {
    /// A successful result with the given output
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            suggestions: Vec::new(),
            next_mode: None,
            confidence: 1.0,
            metadata: Map::new(),
            mode: None,
        }
    }

    /// A failed result carrying a diagnostic message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            suggestions: Vec::new(),
            next_mode: None,
            confidence: 0.0,
            metadata: Map::new(),
            mode: None,
        }
    }

    /// Set the confidence (clamped)
    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    /// Add a follow-up suggestion
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Recommend a mode for the next turn
    #[must_use]
    pub fn with_next_mode(mut self, mode: impl Into<ModeId>) -> Self {
        self.next_mode = Some(mode.into());
        self
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Record which mode handled the turn
    #[must_use]
    pub fn handled_by(mut self, mode: ModeId) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Re-clamp the confidence (for results built by plugins)
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors a mode hook may return
#[derive(Debug, Error)]
pub enum ModeError {
    /// The hook ran and failed
    #[error("{0}")]
    Failed(String),

    /// Something the mode depends on is not reachable
    #[error("mode unavailable: {0}")]
    Unavailable(String),

    /// Any other error raised inside the plugin
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ModeError {
    /// Shorthand for [`ModeError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

// ============================================================================
// Trait
// ============================================================================

/// The capability interface every mode implements
///
/// Implementations must be cheap to share (`Arc<dyn Mode>`) and must not keep
/// per-session state that the core relies on; the session manager owns that.
/// Every call is bounded by a timeout on the core's side.
#[async_trait]
pub trait Mode: Send + Sync {
    /// Static description of this mode
    fn definition(&self) -> &ModeDefinition;

    /// Score how well this mode fits `utterance`
    ///
    /// Must not mutate shared state. The score is independent of other modes.
    async fn can_handle(&self, utterance: &str, ctx: &ModeContext)
        -> Result<HandleScore, ModeError>;

    /// Called when the mode becomes active for a session
    ///
    /// An error aborts the switch.
    async fn activate(&self, ctx: &ModeContext) -> Result<(), ModeError>;

    /// Called when the mode is replaced or its session ends
    async fn deactivate(&self, _session_id: &SessionId) -> Result<(), ModeError> {
        Ok(())
    }

    /// Handle the turn once this mode is active
    async fn process(&self, utterance: &str, ctx: &ModeContext) -> Result<ModeResult, ModeError>;

    /// Shorthand for `definition().id`
    fn id(&self) -> &ModeId {
        &self.definition().id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(-0.5), 0.0);
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert_eq!(clamp_confidence(f32::INFINITY), 1.0);
    }

    #[test]
    fn test_handle_score_is_clamped() {
        let score = HandleScore::new(3.0).because("loud");
        assert_eq!(score.confidence, 1.0);
        assert_eq!(score.reasoning, vec!["loud".to_string()]);
    }

    #[test]
    fn test_mode_result_builders() {
        let result = ModeResult::success("done")
            .with_confidence(1.4)
            .with_suggestion("try again")
            .with_next_mode("teaching")
            .with_metadata("steps", 3);

        assert!(result.success);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.next_mode, Some(ModeId::from("teaching")));
        assert_eq!(result.metadata.get("steps"), Some(&Value::from(3)));

        let failed = ModeResult::failure("nope");
        assert!(!failed.success);
        assert_eq!(failed.confidence, 0.0);
        assert_eq!(failed.output, "nope");
    }

    #[test]
    fn test_context_previous_confidence_is_clamped() {
        let ctx = ModeContext::new(SessionId::from("s"))
            .with_turn(4)
            .with_previous(Some(ModeId::from("debugging")), Some(2.0));
        assert_eq!(ctx.turn, 4);
        assert_eq!(ctx.previous_confidence, Some(1.0));
    }
}
