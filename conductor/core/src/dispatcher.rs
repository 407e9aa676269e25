//! Dispatcher
//!
//! Runs one turn end to end: recognise, switch if needed, process, report.
//!
//! # Turn State Machine
//!
//! ```text
//! Idle ──► Recognizing ──► Switching ──► Processing ──► Done
//!               │              │              │
//!               └──────────────┴──────────────┴──────► Failed
//! ```
//!
//! `Switching` is skipped when the recognised mode is already active.
//!
//! # Failure Handling
//!
//! Nothing a mode does can make `submit_turn` fail: it always returns a
//! [`ModeResult`], with `success = false` and a diagnostic when the turn could
//! not be completed.
//!
//! - Scorer failures and timeouts score 0.0; if every scorer fails the
//!   default mode takes the turn.
//! - Admission rejection tries up to `admission_retry_candidates` next-best
//!   candidates, then the session's current mode, then the default mode.
//! - Deactivation failure abandons the switch; the old mode keeps the turn.
//! - Activation failure rolls back; the session's current mode keeps the turn,
//!   or the default mode is tried once if there was none. If the old mode
//!   cannot be re-activated it is dropped and the default mode is tried.
//! - Processing failure or timeout yields a failed result; the session keeps
//!   its mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;

use crate::admission::{AdmissionControl, AdmissionSnapshot};
use crate::error::{DispatchError, SwitchError};
use crate::events::{DispatchEvent, EventSink, FallbackReason};
use crate::health::{HealthConfig, HealthSnapshot, ModeHealthTracker};
use crate::ids::{ModeId, SessionId};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::mode::{hook, Mode, ModeContext, ModeDefinition, ModeResult};
use crate::recognizer::{Recognition, Recognizer, RecognizerConfig, SelectionReason};
use crate::registry::{ModeFilter, ModeRegistry};
use crate::session::Session;
use crate::session_manager::{SessionConfig, SessionGuard, SessionManager};

/// Default longest accepted utterance, in bytes
pub const DEFAULT_MAX_UTTERANCE_LEN: usize = 32 * 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Everything the dispatcher can be tuned with
#[derive(Clone, Debug, PartialEq)]
pub struct DispatcherConfig {
    /// Recognizer tuning
    pub recognizer: RecognizerConfig,
    /// Session store limits
    pub sessions: SessionConfig,
    /// Circuit breaker tuning
    pub health: HealthConfig,
    /// Longest accepted utterance in bytes
    pub max_utterance_len: usize,
    /// Next-best candidates tried after an admission rejection
    pub admission_retry_candidates: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            recognizer: RecognizerConfig::default(),
            sessions: SessionConfig::default(),
            health: HealthConfig::default(),
            max_utterance_len: DEFAULT_MAX_UTTERANCE_LEN,
            admission_retry_candidates: 0,
        }
    }
}

/// Phases of a turn, as traced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    /// Request accepted
    Idle,
    /// Scoring modes
    Recognizing,
    /// Running the switch protocol
    Switching,
    /// Active mode is processing
    Processing,
    /// Result produced
    Done,
    /// Turn could not be completed
    Failed,
}

fn enter(phase: TurnPhase) {
    tracing::debug!(phase = ?phase, "Turn phase");
}

/// The mode that will process a turn, and the selection confidence behind it
struct Settled {
    mode: Arc<dyn Mode>,
    confidence: f32,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Orchestrates turns across many concurrent sessions
pub struct Dispatcher {
    registry: Arc<ModeRegistry>,
    recognizer: Recognizer,
    sessions: Arc<SessionManager>,
    admission: Arc<AdmissionControl>,
    health: Arc<ModeHealthTracker>,
    sink: Arc<dyn EventSink>,
    metrics: DispatchMetrics,
    config: DispatcherConfig,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over a loaded registry
    pub fn new(
        registry: Arc<ModeRegistry>,
        sink: Arc<dyn EventSink>,
        config: DispatcherConfig,
    ) -> Self {
        let admission = Arc::new(AdmissionControl::from_registry(&registry));
        let health = Arc::new(ModeHealthTracker::new(config.health.clone()));
        let recognizer = Recognizer::new(
            Arc::clone(&registry),
            Arc::clone(&health),
            config.recognizer.clone(),
        );
        let sessions = Arc::new(SessionManager::new(
            config.sessions.clone(),
            Arc::clone(&registry),
            Arc::clone(&admission),
            Arc::clone(&sink),
        ));

        Self {
            registry,
            recognizer,
            sessions,
            admission,
            health,
            sink,
            metrics: DispatchMetrics::new(),
            config,
        }
    }

    /// Handle one utterance for a session
    ///
    /// Turns for the same session run one at a time in arrival order; turns
    /// for different sessions run concurrently. Never fails: problems are
    /// reported through a result with `success = false`.
    pub async fn submit_turn(&self, session_id: &SessionId, utterance: &str) -> ModeResult {
        let span = tracing::info_span!("turn", session = %session_id);
        self.run_turn(session_id, utterance).instrument(span).await
    }

    async fn run_turn(&self, session_id: &SessionId, utterance: &str) -> ModeResult {
        let started = Instant::now();
        enter(TurnPhase::Idle);

        if let Err(err) = self.check_utterance(utterance) {
            self.metrics.record_rejected_utterance();
            tracing::debug!(error = %err, "Utterance rejected");
            let mut result = ModeResult::failure(err.to_string());
            result.mode = self.sessions.current_mode(session_id);
            return result;
        }

        let mut guard = match self.sessions.acquire(session_id).await {
            Ok(guard) => guard,
            Err(err) => {
                enter(TurnPhase::Failed);
                tracing::warn!(error = %err, "Could not acquire session");
                self.metrics.record_turn(started.elapsed(), false);
                return ModeResult::failure(err.to_string());
            }
        };

        let turn = guard.session_mut().begin_turn();
        let previous_mode = guard.current_mode().cloned();
        let previous_confidence = guard.last_confidence();
        let context = || {
            ModeContext::new(session_id.clone())
                .with_turn(turn)
                .with_previous(previous_mode.clone(), previous_confidence)
        };

        enter(TurnPhase::Recognizing);
        let recognition = self.recognizer.recognize(utterance, &context()).await;
        self.metrics
            .record_recognition_timeouts(recognition.timeouts() as u64);
        for mode in recognition.timed_out() {
            let err = DispatchError::RecognitionTimeout(mode.clone());
            tracing::warn!(error = %err, "Scored as 0.0");
        }
        if recognition.is_fallback() {
            self.report_recognition_fallback(session_id, &recognition);
        }

        let settled = match self.settle(&mut guard, &recognition, &context()).await {
            Ok(settled) => settled,
            Err(err) => {
                enter(TurnPhase::Failed);
                guard.session_mut().abort_turn();
                drop(guard);
                let mode = match &err {
                    DispatchError::ActivationFailed { mode, .. }
                    | DispatchError::DeactivationFailed { mode, .. }
                    | DispatchError::AdmissionRejected { mode, .. } => mode.clone(),
                    _ => recognition.winner.clone(),
                };
                tracing::warn!(error = %err, "Turn failed before processing");
                return self.complete(
                    session_id,
                    ModeResult::failure(err.to_string()).handled_by(mode),
                    started.elapsed(),
                );
            }
        };

        enter(TurnPhase::Processing);
        let mode_id = settled.mode.id().clone();
        guard.session_mut().set_turn_mode(&mode_id);
        let result = self.process(&settled.mode, utterance, &context()).await;
        self.sessions.record_turn(&mut guard, settled.confidence);
        drop(guard);

        enter(if result.success {
            TurnPhase::Done
        } else {
            TurnPhase::Failed
        });
        self.complete(session_id, result.handled_by(mode_id), started.elapsed())
    }

    fn check_utterance(&self, utterance: &str) -> Result<(), DispatchError> {
        if utterance.trim().is_empty() {
            return Err(DispatchError::InvalidUtterance("utterance is empty".to_string()));
        }
        if utterance.len() > self.config.max_utterance_len {
            return Err(DispatchError::InvalidUtterance(format!(
                "utterance is {} bytes, limit is {}",
                utterance.len(),
                self.config.max_utterance_len
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Switching
    // ------------------------------------------------------------------------

    /// Decide which mode processes the turn, switching the session if needed
    async fn settle(
        &self,
        guard: &mut SessionGuard,
        recognition: &Recognition,
        ctx: &ModeContext,
    ) -> Result<Settled, DispatchError> {
        let winner = self.mode_or_default(&recognition.winner);
        if guard.current_mode() == Some(winner.id()) {
            return Ok(Settled {
                mode: winner,
                confidence: recognition.confidence,
            });
        }

        enter(TurnPhase::Switching);
        let err = match self
            .sessions
            .begin_switch(guard, &winner, ctx, recognition.confidence)
            .await
        {
            Ok(_) => {
                self.metrics.record_switch();
                return Ok(Settled {
                    mode: winner,
                    confidence: recognition.confidence,
                });
            }
            Err(err) => err,
        };

        let requested = winner.id().clone();
        match err {
            SwitchError::AdmissionRejected { mode, limit } => {
                self.report_admission_rejection(guard.id(), mode, limit);
                self.after_admission_rejection(guard, recognition, ctx, &requested)
                    .await
            }
            SwitchError::DeactivationFailed { mode, reason } => {
                self.metrics.record_deactivation_failure();
                self.health.record_failure(&mode);
                tracing::warn!(mode = %mode, reason = %reason, "Keeping current mode");
                let reason = FallbackReason::DeactivationFailed;
                self.stay_or_default(guard, recognition, ctx, &requested, reason)
                    .await
            }
            SwitchError::ActivationFailed { mode, reason } => {
                self.metrics.record_activation_failure();
                self.health.record_failure(&mode);
                if guard.current_mode().is_none() && &mode == self.registry.default_id() {
                    return Err(DispatchError::ActivationFailed { mode, reason });
                }
                let reason = FallbackReason::ActivationFailed;
                self.stay_or_default(guard, recognition, ctx, &requested, reason)
                    .await
            }
            SwitchError::RollbackFailed {
                mode,
                reason,
                previous,
                ..
            } => {
                self.record_rollback_failure(&mode, &previous);
                if &mode == self.registry.default_id() {
                    return Err(DispatchError::ActivationFailed { mode, reason });
                }
                let reason = FallbackReason::ActivationFailed;
                self.stay_or_default(guard, recognition, ctx, &requested, reason)
                    .await
            }
            SwitchError::UnknownMode(mode) => {
                tracing::warn!(mode = %mode, "Recognised mode is not registered");
                let reason = FallbackReason::ActivationFailed;
                self.stay_or_default(guard, recognition, ctx, &requested, reason)
                    .await
            }
        }
    }

    /// Walk the fallback chain after the winner refused the session
    async fn after_admission_rejection(
        &self,
        guard: &mut SessionGuard,
        recognition: &Recognition,
        ctx: &ModeContext,
        requested: &ModeId,
    ) -> Result<Settled, DispatchError> {
        const REJECTED: FallbackReason = FallbackReason::AdmissionRejected;

        let retries: Vec<(ModeId, f32)> = recognition
            .runners_up()
            .take(self.config.admission_retry_candidates)
            .map(|c| (c.mode_id.clone(), c.confidence))
            .collect();

        for (candidate, confidence) in retries {
            let Some(mode) = self.registry.get(&candidate).cloned() else {
                continue;
            };
            if guard.current_mode() == Some(&candidate) {
                self.report_fallback(guard.id(), Some(requested), &candidate, REJECTED);
                return Ok(Settled { mode, confidence });
            }
            match self.sessions.begin_switch(guard, &mode, ctx, confidence).await {
                Ok(_) => {
                    self.metrics.record_switch();
                    self.report_fallback(guard.id(), Some(requested), &candidate, REJECTED);
                    return Ok(Settled { mode, confidence });
                }
                Err(SwitchError::AdmissionRejected { mode, limit }) => {
                    self.report_admission_rejection(guard.id(), mode, limit);
                }
                Err(SwitchError::ActivationFailed { mode, .. }) => {
                    self.metrics.record_activation_failure();
                    self.health.record_failure(&mode);
                }
                Err(SwitchError::RollbackFailed { mode, previous, .. }) => {
                    self.record_rollback_failure(&mode, &previous);
                }
                Err(SwitchError::DeactivationFailed { mode, .. }) => {
                    // Deactivation will fail again for every candidate
                    self.metrics.record_deactivation_failure();
                    self.health.record_failure(&mode);
                    break;
                }
                Err(SwitchError::UnknownMode(_)) => {}
            }
        }

        self.stay_or_default(guard, recognition, ctx, requested, REJECTED)
            .await
    }

    /// Keep the session's current mode, or move it to the default mode
    async fn stay_or_default(
        &self,
        guard: &mut SessionGuard,
        recognition: &Recognition,
        ctx: &ModeContext,
        requested: &ModeId,
        reason: FallbackReason,
    ) -> Result<Settled, DispatchError> {
        if let Some(current) = guard.current_mode().cloned() {
            if let Some(mode) = self.registry.get(&current).cloned() {
                self.report_fallback(guard.id(), Some(requested), &current, reason);
                let confidence = guard
                    .last_confidence()
                    .unwrap_or_else(|| recognition.confidence_of(&current));
                return Ok(Settled { mode, confidence });
            }
        }

        let default = Arc::clone(self.registry.default_mode());
        let default_id = default.id().clone();
        let confidence = recognition.confidence_of(&default_id);

        match self
            .sessions
            .begin_switch(guard, &default, ctx, confidence)
            .await
        {
            Ok(_) => {
                self.metrics.record_switch();
                self.report_fallback(guard.id(), Some(requested), &default_id, reason);
                Ok(Settled {
                    mode: default,
                    confidence,
                })
            }
            Err(err) => {
                if let SwitchError::ActivationFailed { mode, .. } = &err {
                    self.metrics.record_activation_failure();
                    self.health.record_failure(mode);
                }
                if let SwitchError::AdmissionRejected { mode, limit } = &err {
                    self.report_admission_rejection(guard.id(), mode.clone(), *limit);
                }
                Err(err.into())
            }
        }
    }

    /// Both the target and the mode it displaced failed to activate
    fn record_rollback_failure(&self, mode: &ModeId, previous: &ModeId) {
        self.metrics.record_activation_failure();
        self.metrics.record_activation_failure();
        self.health.record_failure(mode);
        self.health.record_failure(previous);
    }

    fn mode_or_default(&self, id: &ModeId) -> Arc<dyn Mode> {
        Arc::clone(
            self.registry
                .get(id)
                .unwrap_or_else(|| self.registry.default_mode()),
        )
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    async fn process(
        &self,
        mode: &Arc<dyn Mode>,
        utterance: &str,
        ctx: &ModeContext,
    ) -> ModeResult {
        let mode_id = mode.id();
        match hook::invoke(mode.process(utterance, ctx), mode.definition().timeout()).await {
            Ok(result) => {
                self.health.record_success(mode_id);
                result.clamped()
            }
            Err(failure) => {
                self.health.record_failure(mode_id);
                self.metrics.record_processing_failure(failure.is_timeout());
                let err = DispatchError::ProcessingFailed {
                    mode: mode_id.clone(),
                    reason: failure.to_string(),
                };
                tracing::warn!(mode = %mode_id, error = %err, "Processing failed");
                ModeResult::failure(err.to_string())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    fn complete(
        &self,
        session_id: &SessionId,
        result: ModeResult,
        elapsed: Duration,
    ) -> ModeResult {
        self.metrics.record_turn(elapsed, result.success);
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if let Some(mode_id) = result.mode.clone() {
            self.sink.publish(DispatchEvent::TurnCompleted {
                mode_id,
                session_id: session_id.clone(),
                confidence: result.confidence,
                duration_ms,
                success: result.success,
            });
        }

        tracing::info!(
            mode = result.mode.as_ref().map_or("none", ModeId::as_str),
            confidence = result.confidence,
            success = result.success,
            duration_ms,
            "Turn completed"
        );
        result
    }

    fn report_recognition_fallback(&self, session_id: &SessionId, recognition: &Recognition) {
        let (requested, reason) = match recognition.selection {
            SelectionReason::BestMatch => return,
            SelectionReason::AllFailed => (None, FallbackReason::AllFailed),
            SelectionReason::BelowThreshold => {
                let best = recognition.best().map(|c| &c.mode_id);
                // A default mode that merely scored its own baseline is not a fallback
                if best.is_none() || best == Some(&recognition.winner) {
                    return;
                }
                (best, FallbackReason::BelowThreshold)
            }
        };
        self.report_fallback(session_id, requested, &recognition.winner, reason);
    }

    fn report_fallback(
        &self,
        session_id: &SessionId,
        requested: Option<&ModeId>,
        fallback: &ModeId,
        reason: FallbackReason,
    ) {
        self.metrics.record_fallback();
        tracing::info!(
            requested = requested.map_or("none", ModeId::as_str),
            fallback = %fallback,
            reason = ?reason,
            "Fallback selected"
        );
        self.sink.publish(DispatchEvent::FallbackSelected {
            session_id: session_id.clone(),
            requested: requested.cloned(),
            fallback: fallback.clone(),
            reason,
        });
    }

    fn report_admission_rejection(&self, session_id: &SessionId, mode: ModeId, limit: usize) {
        self.metrics.record_admission_rejection();
        tracing::info!(mode = %mode, limit, "Admission rejected");
        self.sink.publish(DispatchEvent::AdmissionRejected {
            mode_id: mode,
            session_id: session_id.clone(),
            limit,
        });
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Active mode of a session (does not wait for a running turn)
    #[must_use]
    pub fn current_mode(&self, session_id: &SessionId) -> Option<ModeId> {
        self.sessions.current_mode(session_id)
    }

    /// Mode definitions matching `filter`, in registration order
    #[must_use]
    pub fn list_modes(&self, filter: &ModeFilter) -> Vec<ModeDefinition> {
        self.registry.list(filter).into_iter().cloned().collect()
    }

    /// Mode definitions matching `query`, best match first
    #[must_use]
    pub fn search_modes(&self, query: &str) -> Vec<ModeDefinition> {
        self.registry.search(query).into_iter().cloned().collect()
    }

    /// End a session explicitly; returns false if it did not exist
    pub async fn end_session(&self, session_id: &SessionId) -> bool {
        self.sessions.end_session(session_id).await
    }

    /// Copy of a session's state (waits for a running turn)
    pub async fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.snapshot(session_id).await
    }

    /// Counters and latency
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Per-mode admission counters
    #[must_use]
    pub fn admission(&self) -> Vec<AdmissionSnapshot> {
        self.admission.snapshot()
    }

    /// Per-mode circuit state
    #[must_use]
    pub fn health(&self) -> Vec<HealthSnapshot> {
        self.health.snapshot()
    }

    /// The session store (for idle reaping)
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The mode registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModeRegistry> {
        &self.registry
    }

    /// Settings in force
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }
}
