//! Recognizer
//!
//! Scores an utterance against every enabled mode and picks the one that
//! should own the turn.
//!
//! # Algorithm
//!
//! 1. Call `can_handle` on every enabled mode concurrently, each bounded by
//!    `min(score_timeout, mode timeout)`. Timeouts, errors and panics score
//!    0.0 with a note saying which. Modes whose circuit is open are not called.
//! 2. Rank candidates by confidence, then priority, then continuity with the
//!    mode that owned the session before this turn, then id (ascending).
//! 3. If the best candidate clears `min_confidence` it wins. Otherwise the
//!    registry's default mode wins, so a weak match never hijacks a turn.
//!
//! The ranking is a total order over distinct ids, so the same scores always
//! produce the same winner.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::health::ModeHealthTracker;
use crate::ids::ModeId;
use crate::mode::{clamp_confidence, hook, HookFailure, ModeContext};
use crate::registry::ModeRegistry;

/// Recognizer tuning
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizerConfig {
    /// Minimum confidence a candidate needs to win
    pub min_confidence: f32,
    /// Upper bound on a single `can_handle` call
    pub score_timeout: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.15,
            score_timeout: Duration::from_millis(250),
        }
    }
}

/// How a candidate's score was obtained
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreOutcome {
    /// `can_handle` returned a score
    Scored,
    /// `can_handle` exceeded its bound
    TimedOut,
    /// `can_handle` returned an error
    Failed,
    /// `can_handle` panicked
    Panicked,
    /// Not called because the mode's circuit is open
    Skipped,
}

/// One mode's score for one utterance
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecognitionCandidate {
    /// Mode id
    pub mode_id: ModeId,
    /// Confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Why, most important first
    pub reasoning: Vec<String>,
    /// Configured priority (tie-break)
    pub priority: i32,
    /// How the score was obtained
    pub outcome: ScoreOutcome,
}

/// Why the winner was chosen
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    /// The top-ranked candidate cleared the threshold
    BestMatch,
    /// Nothing cleared the threshold; the default mode was chosen
    BelowThreshold,
    /// Every scorer other than the default failed; the default mode was chosen
    AllFailed,
}

/// Output of one recognition pass
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recognition {
    /// Mode that should own the turn
    pub winner: ModeId,
    /// Winner's confidence
    pub confidence: f32,
    /// Every candidate, best first
    pub candidates: Vec<RecognitionCandidate>,
    /// How the winner was chosen
    pub selection: SelectionReason,
    /// Threshold in force for this pass
    pub threshold: f32,
}

impl Recognition {
    /// The top-ranked candidate, whether or not it won
    #[must_use]
    pub fn best(&self) -> Option<&RecognitionCandidate> {
        self.candidates.first()
    }

    /// Candidates other than the winner that clear the threshold, best first
    pub fn runners_up(&self) -> impl Iterator<Item = &RecognitionCandidate> {
        self.candidates
            .iter()
            .filter(move |c| c.mode_id != self.winner && c.confidence >= self.threshold)
    }

    /// Confidence a given mode scored (0.0 if it was not scored)
    #[must_use]
    pub fn confidence_of(&self, mode: &ModeId) -> f32 {
        self.candidates
            .iter()
            .find(|c| &c.mode_id == mode)
            .map_or(0.0, |c| c.confidence)
    }

    /// Number of scorers that timed out
    #[must_use]
    pub fn timeouts(&self) -> usize {
        self.timed_out().count()
    }

    /// Modes whose scorer exceeded its bound
    pub fn timed_out(&self) -> impl Iterator<Item = &ModeId> {
        self.candidates
            .iter()
            .filter(|c| c.outcome == ScoreOutcome::TimedOut)
            .map(|c| &c.mode_id)
    }

    /// Whether the winner is a fallback rather than the best match
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.selection != SelectionReason::BestMatch
    }
}

/// Total order used for ranking: best first
fn rank(a: &RecognitionCandidate, b: &RecognitionCandidate, previous: Option<&ModeId>) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| {
            let a_prev = previous == Some(&a.mode_id);
            let b_prev = previous == Some(&b.mode_id);
            b_prev.cmp(&a_prev)
        })
        .then_with(|| a.mode_id.cmp(&b.mode_id))
}

/// Scores utterances against the registry
#[derive(Debug)]
pub struct Recognizer {
    registry: Arc<ModeRegistry>,
    health: Arc<ModeHealthTracker>,
    config: RecognizerConfig,
}

impl Recognizer {
    /// Create a recognizer
    pub fn new(
        registry: Arc<ModeRegistry>,
        health: Arc<ModeHealthTracker>,
        config: RecognizerConfig,
    ) -> Self {
        Self {
            registry,
            health,
            config,
        }
    }

    /// Tuning in force
    #[must_use]
    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// Score `utterance` against every enabled mode and pick a winner
    pub async fn recognize(&self, utterance: &str, ctx: &ModeContext) -> Recognition {
        let default_id = self.registry.default_id().clone();

        let scoring = self.registry.enabled().map(|mode| {
            let definition = mode.definition();
            let mode_id = definition.id.clone();
            let priority = definition.priority;
            let bound = self.config.score_timeout.min(definition.timeout());
            let skip = mode_id != default_id && !self.health.is_available(&mode_id);

            async move {
                if skip {
                    return RecognitionCandidate {
                        mode_id,
                        confidence: 0.0,
                        reasoning: vec!["circuit open".to_string()],
                        priority,
                        outcome: ScoreOutcome::Skipped,
                    };
                }

                let (confidence, reasoning, outcome) =
                    match hook::invoke(mode.can_handle(utterance, ctx), bound).await {
                        // Plugins may build HandleScore by hand; clamp again
                        Ok(score) => (
                            clamp_confidence(score.confidence),
                            score.reasoning,
                            ScoreOutcome::Scored,
                        ),
                        Err(HookFailure::TimedOut(_)) => {
                            (0.0, vec!["timed out".to_string()], ScoreOutcome::TimedOut)
                        }
                        Err(HookFailure::Panicked(_)) => {
                            (0.0, vec!["panicked".to_string()], ScoreOutcome::Panicked)
                        }
                        Err(HookFailure::Failed(reason)) => {
                            (0.0, vec![format!("error: {reason}")], ScoreOutcome::Failed)
                        }
                    };

                if outcome != ScoreOutcome::Scored {
                    tracing::debug!(
                        session = %ctx.session_id,
                        mode = %mode_id,
                        outcome = ?outcome,
                        "Scorer did not produce a score"
                    );
                }

                RecognitionCandidate {
                    mode_id,
                    confidence,
                    reasoning,
                    priority,
                    outcome,
                }
            }
        });

        let mut candidates = join_all(scoring).await;
        candidates.sort_by(|a, b| rank(a, b, ctx.previous_mode.as_ref()));

        let threshold = self.config.min_confidence;
        let recognition = match candidates.first() {
            Some(best) if best.confidence >= threshold => Recognition {
                winner: best.mode_id.clone(),
                confidence: best.confidence,
                selection: SelectionReason::BestMatch,
                threshold,
                candidates,
            },
            _ => {
                let invoked: Vec<&RecognitionCandidate> = candidates
                    .iter()
                    .filter(|c| c.mode_id != default_id && c.outcome != ScoreOutcome::Skipped)
                    .collect();
                let all_failed =
                    !invoked.is_empty() && invoked.iter().all(|c| c.outcome != ScoreOutcome::Scored);

                let confidence = candidates
                    .iter()
                    .find(|c| c.mode_id == default_id)
                    .map_or(0.0, |c| c.confidence);

                Recognition {
                    winner: default_id,
                    confidence,
                    selection: if all_failed {
                        SelectionReason::AllFailed
                    } else {
                        SelectionReason::BelowThreshold
                    },
                    threshold,
                    candidates,
                }
            }
        };

        tracing::debug!(
            session = %ctx.session_id,
            winner = %recognition.winner,
            confidence = recognition.confidence,
            selection = ?recognition.selection,
            candidates = recognition.candidates.len(),
            "Recognition complete"
        );

        recognition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use crate::ids::SessionId;
    use crate::testing::{Behavior, ScriptedMode};
    use pretty_assertions::assert_eq;

    fn recognizer(modes: Vec<ScriptedMode>) -> Recognizer {
        recognizer_with(modes, Arc::new(ModeHealthTracker::default()))
    }

    fn recognizer_with(modes: Vec<ScriptedMode>, health: Arc<ModeHealthTracker>) -> Recognizer {
        let mut builder = ModeRegistry::builder();
        for mode in modes {
            builder = builder.register(mode);
        }
        Recognizer::new(
            Arc::new(builder.build().unwrap()),
            health,
            RecognizerConfig {
                min_confidence: 0.15,
                score_timeout: Duration::from_millis(50),
            },
        )
    }

    fn ctx() -> ModeContext {
        ModeContext::new(SessionId::from("s1"))
    }

    #[tokio::test]
    async fn test_highest_confidence_wins() {
        let r = recognizer(vec![
            ScriptedMode::new("debugging", 0.8),
            ScriptedMode::new("teaching", 0.4),
        ]);
        let rec = r.recognize("anything", &ctx()).await;

        assert_eq!(rec.winner, ModeId::from("debugging"));
        assert_eq!(rec.selection, SelectionReason::BestMatch);
        let order: Vec<String> = rec.candidates.iter().map(|c| c.mode_id.to_string()).collect();
        assert_eq!(order, vec!["debugging", "teaching", "chatting"]);
        assert_eq!(
            rec.runners_up().map(|c| c.mode_id.to_string()).collect::<Vec<_>>(),
            vec!["teaching"]
        );
    }

    #[tokio::test]
    async fn test_ties_break_on_priority_then_continuity_then_id() {
        let r = recognizer(vec![
            ScriptedMode::new("zeta", 0.5).priority(1),
            ScriptedMode::new("beta", 0.5),
            ScriptedMode::new("alpha", 0.5),
        ]);

        assert_eq!(r.recognize("x", &ctx()).await.winner, ModeId::from("zeta"));

        let r = recognizer(vec![
            ScriptedMode::new("beta", 0.5),
            ScriptedMode::new("alpha", 0.5),
        ]);
        assert_eq!(r.recognize("x", &ctx()).await.winner, ModeId::from("alpha"));

        let with_previous = ctx().with_previous(Some(ModeId::from("beta")), Some(0.5));
        assert_eq!(
            r.recognize("x", &with_previous).await.winner,
            ModeId::from("beta")
        );
    }

    #[tokio::test]
    async fn test_below_threshold_picks_default() {
        let r = recognizer(vec![ScriptedMode::new("debugging", 0.1)]);
        let rec = r.recognize("hello", &ctx()).await;

        assert_eq!(rec.winner, ModeId::from("chatting"));
        assert_eq!(rec.selection, SelectionReason::BelowThreshold);
        assert_eq!(rec.best().map(|c| c.mode_id.clone()), Some(ModeId::from("debugging")));
        assert!(rec.is_fallback());
    }

    #[tokio::test]
    async fn test_failures_score_zero_with_reason() {
        let r = recognizer(vec![
            ScriptedMode::new("slow", 0.9).scoring(Behavior::Hang),
            ScriptedMode::new("broken", 0.9).scoring(Behavior::Fail),
            ScriptedMode::new("wild", 0.9).scoring(Behavior::Panic),
        ]);
        let rec = r.recognize("x", &ctx()).await;

        assert_eq!(rec.winner, ModeId::from("chatting"));
        assert_eq!(rec.selection, SelectionReason::AllFailed);
        assert_eq!(rec.timeouts(), 1);
        assert_eq!(rec.timed_out().collect::<Vec<_>>(), vec![&ModeId::from("slow")]);

        let reason = |id: &str| {
            rec.candidates
                .iter()
                .find(|c| c.mode_id == id)
                .map(|c| (c.confidence, c.reasoning[0].clone()))
                .unwrap()
        };
        assert_eq!(reason("slow"), (0.0, "timed out".to_string()));
        assert_eq!(reason("broken"), (0.0, "error: can_handle refused".to_string()));
        assert_eq!(reason("wild"), (0.0, "panicked".to_string()));
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let r = recognizer(vec![ScriptedMode::new("loud", 7.0)]);
        let rec = r.recognize("x", &ctx()).await;
        assert_eq!(rec.confidence, 1.0);
        assert!(rec.candidates.iter().all(|c| (0.0..=1.0).contains(&c.confidence)));
    }

    #[tokio::test]
    async fn test_disabled_modes_are_not_scored() {
        let hidden = ScriptedMode::new("hidden", 0.9).disabled();
        let calls = hidden.calls();
        let r = recognizer(vec![hidden]);
        let rec = r.recognize("x", &ctx()).await;

        assert_eq!(rec.winner, ModeId::from("chatting"));
        assert!(calls.entries().is_empty());
    }

    #[tokio::test]
    async fn test_open_circuit_is_skipped() {
        let health = Arc::new(ModeHealthTracker::new(HealthConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        }));
        health.record_failure(&ModeId::from("flaky"));

        let flaky = ScriptedMode::new("flaky", 0.9);
        let calls = flaky.calls();
        let r = recognizer_with(vec![flaky, ScriptedMode::new("steady", 0.3)], health);
        let rec = r.recognize("x", &ctx()).await;

        assert_eq!(rec.winner, ModeId::from("steady"));
        assert!(calls.entries().is_empty());
        let skipped = rec.candidates.iter().find(|c| c.mode_id == "flaky").unwrap();
        assert_eq!(skipped.outcome, ScoreOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_selection_is_deterministic() {
        let r = recognizer(vec![
            ScriptedMode::new("a", 0.5),
            ScriptedMode::new("b", 0.5),
            ScriptedMode::new("c", 0.5),
        ]);
        let first = r.recognize("x", &ctx()).await;
        for _ in 0..10 {
            let again = r.recognize("x", &ctx()).await;
            assert_eq!(again.winner, first.winner);
            assert_eq!(again.candidates, first.candidates);
        }
    }
}
