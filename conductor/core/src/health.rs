//! Mode Health Tracking and Circuit Breaker
//!
//! Counts consecutive hook failures per mode. A mode that keeps failing is
//! taken out of recognition for a while so it stops costing every turn a
//! timeout.
//!
//! # Circuit Breaker
//!
//! ```text
//! +--------+   failure_threshold   +------+   recovery_timeout   +-----------+
//! | Closed | --------------------> | Open | -------------------> | Half-Open |
//! +--------+       failures        +------+                      +-----------+
//!     ^                               ^                                |
//!     |          1 success            |          1 failure             |
//!     +-------------------------------+--------------------------------+
//! ```
//!
//! Activation failures, processing failures and processing timeouts count as
//! failures. Scoring problems do not: a mode that cannot score is simply
//! scored 0.0 for that turn.
//!
//! # Thread Safety
//!
//! Per-mode state is atomics only; the tracker indexes it with a `DashMap`.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::ids::ModeId;

// ============================================================================
// Configuration
// ============================================================================

/// Circuit breaker tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit stays open
    pub recovery_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Skipped by recognition
    Open,
    /// Recovery probe allowed
    HalfOpen,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

// ============================================================================
// Mode Health
// ============================================================================

/// Health state for a single mode
#[derive(Debug)]
pub struct ModeHealth {
    mode: ModeId,
    config: HealthConfig,
    circuit: AtomicU8,
    consecutive_failures: AtomicU32,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    /// Millis since `epoch` when the circuit last opened
    opened_at_ms: AtomicU64,
    epoch: Instant,
}

impl ModeHealth {
    /// Create a closed circuit for `mode`
    #[must_use]
    pub fn new(mode: ModeId, config: HealthConfig) -> Self {
        Self {
            mode,
            config,
            circuit: AtomicU8::new(CircuitState::Closed.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            opened_at_ms: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    /// Current circuit state (does not advance Open to Half-Open)
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        CircuitState::from_u8(self.circuit.load(Ordering::Acquire))
    }

    /// Whether the mode should be offered work right now
    ///
    /// An open circuit whose recovery timeout elapsed moves to half-open and
    /// reports available.
    pub fn is_available(&self) -> bool {
        match self.circuit_state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self.maybe_half_open(),
        }
    }

    fn maybe_half_open(&self) -> bool {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let recovery_ms = u64::try_from(self.config.recovery_timeout.as_millis()).unwrap_or(u64::MAX);
        if self.now_ms().saturating_sub(opened_at) < recovery_ms {
            return false;
        }

        let moved = self
            .circuit
            .compare_exchange(
                CircuitState::Open.as_u8(),
                CircuitState::HalfOpen.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved {
            tracing::info!(mode = %self.mode, "Circuit half-open, probing mode again");
        }
        // Another caller may have won the transition; either way it is no longer open
        self.circuit_state() != CircuitState::Open
    }

    /// Record a successful hook call
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        let previous = self
            .circuit
            .swap(CircuitState::Closed.as_u8(), Ordering::AcqRel);
        if CircuitState::from_u8(previous) != CircuitState::Closed {
            tracing::info!(mode = %self.mode, "Circuit closed, mode recovered");
        }
    }

    /// Record a failed hook call
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.circuit_state() {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                self.open(failures);
            }
            CircuitState::HalfOpen => self.open(failures),
            _ => {}
        }
    }

    fn open(&self, failures: u32) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        self.circuit
            .store(CircuitState::Open.as_u8(), Ordering::Release);
        tracing::warn!(
            mode = %self.mode,
            consecutive_failures = failures,
            recovery_secs = self.config.recovery_timeout.as_secs(),
            "Circuit opened, mode skipped until recovery"
        );
    }

    /// Snapshot for introspection
    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            mode: self.mode.clone(),
            circuit: self.circuit_state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Serializable view of a mode's health
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    /// Mode id
    pub mode: ModeId,
    /// Circuit state
    pub circuit: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Lifetime successes
    pub total_successes: u64,
    /// Lifetime failures
    pub total_failures: u64,
}

// ============================================================================
// Tracker
// ============================================================================

/// Health state for every mode that has been used
#[derive(Debug, Default)]
pub struct ModeHealthTracker {
    config: HealthConfig,
    modes: DashMap<ModeId, Arc<ModeHealth>>,
}

impl ModeHealthTracker {
    /// Create a tracker
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            modes: DashMap::new(),
        }
    }

    /// Get or create the health entry for `mode`
    pub fn get(&self, mode: &ModeId) -> Arc<ModeHealth> {
        if let Some(health) = self.modes.get(mode) {
            return Arc::clone(health.value());
        }
        Arc::clone(
            self.modes
                .entry(mode.clone())
                .or_insert_with(|| Arc::new(ModeHealth::new(mode.clone(), self.config.clone())))
                .value(),
        )
    }

    /// Whether `mode` may be offered work
    pub fn is_available(&self, mode: &ModeId) -> bool {
        self.modes.get(mode).map_or(true, |h| h.is_available())
    }

    /// Record a successful hook call
    pub fn record_success(&self, mode: &ModeId) {
        self.get(mode).record_success();
    }

    /// Record a failed hook call
    pub fn record_failure(&self, mode: &ModeId) {
        self.get(mode).record_failure();
    }

    /// Snapshot of every tracked mode, sorted by id
    #[must_use]
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut all: Vec<HealthSnapshot> = self.modes.iter().map(|h| h.snapshot()).collect();
        all.sort_by(|a, b| a.mode.cmp(&b.mode));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(recovery: Duration) -> ModeHealthTracker {
        ModeHealthTracker::new(HealthConfig {
            failure_threshold: 3,
            recovery_timeout: recovery,
        })
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let tracker = tracker(Duration::from_secs(60));
        let mode = ModeId::from("flaky");

        tracker.record_failure(&mode);
        tracker.record_failure(&mode);
        assert!(tracker.is_available(&mode));

        tracker.record_failure(&mode);
        assert!(!tracker.is_available(&mode));
        assert_eq!(tracker.get(&mode).circuit_state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failures() {
        let tracker = tracker(Duration::from_secs(60));
        let mode = ModeId::from("flaky");

        tracker.record_failure(&mode);
        tracker.record_failure(&mode);
        tracker.record_success(&mode);
        tracker.record_failure(&mode);
        assert!(tracker.is_available(&mode));
        assert_eq!(tracker.get(&mode).snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let tracker = tracker(Duration::ZERO);
        let mode = ModeId::from("flaky");
        for _ in 0..3 {
            tracker.record_failure(&mode);
        }

        assert!(tracker.is_available(&mode));
        assert_eq!(tracker.get(&mode).circuit_state(), CircuitState::HalfOpen);

        // One failure while half-open reopens the circuit
        tracker.record_failure(&mode);
        assert_eq!(tracker.get(&mode).circuit_state(), CircuitState::Open);

        assert!(tracker.is_available(&mode));
        tracker.record_success(&mode);
        assert_eq!(tracker.get(&mode).circuit_state(), CircuitState::Closed);
    }

    #[test]
    fn test_untracked_mode_is_available() {
        let tracker = tracker(Duration::from_secs(1));
        assert!(tracker.is_available(&ModeId::from("never-used")));
        assert!(tracker.snapshot().is_empty());
    }
}
