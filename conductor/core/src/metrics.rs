//! Dispatch Metrics
//!
//! Lock-free counters and a turn-latency histogram, updated on the hot path
//! with relaxed atomics and read through [`DispatchMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// ============================================================================
// Histogram for Latency Tracking
// ============================================================================

/// Fixed-bucket histogram of millisecond values
#[derive(Debug)]
pub struct Histogram {
    /// Inclusive upper bounds, ascending
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    total: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create a histogram with the given upper bounds
    ///
    /// Values above the last bound land in the last bucket.
    #[must_use]
    pub fn new(mut buckets: Vec<u64>) -> Self {
        buckets.sort_unstable();
        buckets.dedup();
        if buckets.is_empty() {
            buckets.push(u64::MAX);
        }
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            total: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Buckets suited to turn latencies
    #[must_use]
    pub fn turn_latency() -> Self {
        Self::new(vec![
            1, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000, 60_000,
        ])
    }

    /// Record one value
    pub fn record(&self, value_ms: u64) {
        let idx = self
            .buckets
            .iter()
            .position(|&b| value_ms <= b)
            .unwrap_or(self.buckets.len() - 1);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.max.fetch_max(value_ms, Ordering::Relaxed);
    }

    /// Summarise the distribution
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        let counts: Vec<u64> = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        let total = self.total.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        let percentile = |p: u64| -> u64 {
            if total == 0 {
                return 0;
            }
            let target = (total * p).div_ceil(100);
            let mut cumulative = 0;
            for (i, count) in counts.iter().enumerate() {
                cumulative += count;
                if cumulative >= target {
                    return self.buckets[i];
                }
            }
            self.buckets[self.buckets.len() - 1]
        };

        LatencySummary {
            count: total,
            mean_ms: if total == 0 { 0 } else { sum / total },
            p50_ms: percentile(50),
            p90_ms: percentile(90),
            p99_ms: percentile(99),
            max_ms: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Latency distribution summary; percentiles are bucket upper bounds
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    /// Samples recorded
    pub count: u64,
    /// Mean in ms
    pub mean_ms: u64,
    /// Median bucket bound
    pub p50_ms: u64,
    /// 90th percentile bucket bound
    pub p90_ms: u64,
    /// 99th percentile bucket bound
    pub p99_ms: u64,
    /// Largest sample
    pub max_ms: u64,
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Counters for everything the dispatcher does
#[derive(Debug)]
pub struct DispatchMetrics {
    turns: AtomicU64,
    failed_turns: AtomicU64,
    rejected_utterances: AtomicU64,
    switches: AtomicU64,
    admission_rejections: AtomicU64,
    activation_failures: AtomicU64,
    deactivation_failures: AtomicU64,
    processing_failures: AtomicU64,
    processing_timeouts: AtomicU64,
    recognition_timeouts: AtomicU64,
    fallbacks: AtomicU64,
    turn_latency: Histogram,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            turns: AtomicU64::new(0),
            failed_turns: AtomicU64::new(0),
            rejected_utterances: AtomicU64::new(0),
            switches: AtomicU64::new(0),
            admission_rejections: AtomicU64::new(0),
            activation_failures: AtomicU64::new(0),
            deactivation_failures: AtomicU64::new(0),
            processing_failures: AtomicU64::new(0),
            processing_timeouts: AtomicU64::new(0),
            recognition_timeouts: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            turn_latency: Histogram::turn_latency(),
        }
    }
}

impl DispatchMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A turn finished
    pub fn record_turn(&self, duration: Duration, success: bool) {
        self.turns.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_turns.fetch_add(1, Ordering::Relaxed);
        }
        self.turn_latency
            .record(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// An utterance was refused before recognition
    pub fn record_rejected_utterance(&self) {
        self.rejected_utterances.fetch_add(1, Ordering::Relaxed);
    }

    /// A switch committed
    pub fn record_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    /// A mode refused a session at its ceiling
    pub fn record_admission_rejection(&self) {
        self.admission_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// An `activate` hook failed
    pub fn record_activation_failure(&self) {
        self.activation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A `deactivate` hook failed
    pub fn record_deactivation_failure(&self) {
        self.deactivation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A `process` hook failed; `timed_out` distinguishes timeouts
    pub fn record_processing_failure(&self, timed_out: bool) {
        if timed_out {
            self.processing_timeouts.fetch_add(1, Ordering::Relaxed);
        } else {
            self.processing_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `count` scorers timed out during one recognition
    pub fn record_recognition_timeouts(&self, count: u64) {
        if count > 0 {
            self.recognition_timeouts.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// A turn was routed to a fallback
    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            turns: load(&self.turns),
            failed_turns: load(&self.failed_turns),
            rejected_utterances: load(&self.rejected_utterances),
            switches: load(&self.switches),
            admission_rejections: load(&self.admission_rejections),
            activation_failures: load(&self.activation_failures),
            deactivation_failures: load(&self.deactivation_failures),
            processing_failures: load(&self.processing_failures),
            processing_timeouts: load(&self.processing_timeouts),
            recognition_timeouts: load(&self.recognition_timeouts),
            fallbacks: load(&self.fallbacks),
            turn_latency: self.turn_latency.summary(),
        }
    }
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Turns completed (including failed ones)
    pub turns: u64,
    /// Turns whose result was a failure
    pub failed_turns: u64,
    /// Empty or over-long utterances refused
    pub rejected_utterances: u64,
    /// Committed mode switches
    pub switches: u64,
    /// Admission rejections
    pub admission_rejections: u64,
    /// Failed activations
    pub activation_failures: u64,
    /// Failed deactivations
    pub deactivation_failures: u64,
    /// `process` errors and panics
    pub processing_failures: u64,
    /// `process` timeouts
    pub processing_timeouts: u64,
    /// `can_handle` timeouts
    pub recognition_timeouts: u64,
    /// Turns routed to a fallback
    pub fallbacks: u64,
    /// Turn latency
    pub turn_latency: LatencySummary,
}
