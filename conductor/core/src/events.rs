//! Dispatch Events
//!
//! Outbound notifications about mode lifecycle and completed turns. The
//! dispatcher publishes them to an injected [`EventSink`]; the host decides
//! where they go (UI status line, analytics, logs).
//!
//! # Design Philosophy
//!
//! Publishing never blocks a turn. Sinks are synchronous and must return
//! immediately: the channel sink uses `try_send` and drops (with a warning)
//! when the receiver is slow or gone. A lost status notification is
//! acceptable; a stalled conversation is not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ids::{ModeId, SessionId};

/// Why the dispatcher routed a turn to a fallback
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackReason {
    /// No candidate cleared the admission threshold
    BelowThreshold,
    /// Every scorer failed or timed out
    AllFailed,
    /// The winner was at its concurrency ceiling
    AdmissionRejected,
    /// The winner failed to activate
    ActivationFailed,
    /// The outgoing mode failed to deactivate
    DeactivationFailed,
}

/// Events published by the dispatcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum DispatchEvent {
    /// A mode became active for a session
    ModeActivated {
        /// Activated mode
        mode_id: ModeId,
        /// Session
        session_id: SessionId,
        /// When the switch committed
        timestamp: DateTime<Utc>,
    },

    /// A mode stopped being active for a session
    ModeDeactivated {
        /// Deactivated mode
        mode_id: ModeId,
        /// Session
        session_id: SessionId,
        /// When the mode was released
        timestamp: DateTime<Utc>,
    },

    /// A turn finished (successfully or not)
    TurnCompleted {
        /// Mode that handled the turn
        mode_id: ModeId,
        /// Session
        session_id: SessionId,
        /// Result confidence
        confidence: f32,
        /// Wall time of the whole turn
        duration_ms: u64,
        /// Whether processing succeeded
        success: bool,
    },

    /// A mode refused a session at its concurrency ceiling
    AdmissionRejected {
        /// Rejecting mode
        mode_id: ModeId,
        /// Session
        session_id: SessionId,
        /// Configured ceiling
        limit: usize,
    },

    /// A turn was routed somewhere other than the recognizer's pick
    FallbackSelected {
        /// Session
        session_id: SessionId,
        /// Mode the recognizer picked (absent when every scorer failed)
        requested: Option<ModeId>,
        /// Mode that took the turn
        fallback: ModeId,
        /// Why
        reason: FallbackReason,
    },
}

impl DispatchEvent {
    /// Session the event belongs to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::ModeActivated { session_id, .. }
            | Self::ModeDeactivated { session_id, .. }
            | Self::TurnCompleted { session_id, .. }
            | Self::AdmissionRejected { session_id, .. }
            | Self::FallbackSelected { session_id, .. } => session_id,
        }
    }

    /// Kebab-case event name, matching the serialized `type` tag
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ModeActivated { .. } => "mode-activated",
            Self::ModeDeactivated { .. } => "mode-deactivated",
            Self::TurnCompleted { .. } => "turn-completed",
            Self::AdmissionRejected { .. } => "admission-rejected",
            Self::FallbackSelected { .. } => "fallback-selected",
        }
    }

    pub(crate) fn activated(mode_id: ModeId, session_id: SessionId) -> Self {
        Self::ModeActivated {
            mode_id,
            session_id,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn deactivated(mode_id: ModeId, session_id: SessionId) -> Self {
        Self::ModeDeactivated {
            mode_id,
            session_id,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Outbound notification surface owned by the host
///
/// `publish` is called from inside turns and must not block.
pub trait EventSink: Send + Sync {
    /// Deliver one event
    fn publish(&self, event: DispatchEvent);
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: DispatchEvent) {}
}

/// Forwards events into a bounded tokio channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<DispatchEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver the host drains
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::from_sender(tx), rx)
    }

    /// Wrap an existing sender
    #[must_use]
    pub fn from_sender(tx: mpsc::Sender<DispatchEvent>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events dropped because the channel was full or closed
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: DispatchEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "channel closed",
            };
            tracing::warn!(reason, dropped = total, "Dropped dispatch event");
        }
    }
}

/// Publishes every event to several sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Number of downstream sinks
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether there are no downstream sinks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn publish(&self, event: DispatchEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.publish(event.clone());
            }
            last.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn completed() -> DispatchEvent {
        DispatchEvent::TurnCompleted {
            mode_id: ModeId::from("debugging"),
            session_id: SessionId::from("s1"),
            confidence: 0.8,
            duration_ms: 12,
            success: true,
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(completed()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "turn-completed",
                "modeId": "debugging",
                "sessionId": "s1",
                "confidence": 0.8_f32,
                "durationMs": 12,
                "success": true
            })
        );

        let fallback = DispatchEvent::FallbackSelected {
            session_id: SessionId::from("s1"),
            requested: Some(ModeId::from("debugging")),
            fallback: ModeId::from("chatting"),
            reason: FallbackReason::AdmissionRejected,
        };
        let json = serde_json::to_value(&fallback).unwrap();
        assert_eq!(json["type"], "fallback-selected");
        assert_eq!(json["reason"], "admission-rejected");
        assert_eq!(fallback.kind(), "fallback-selected");
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.publish(completed());
        sink.publish(completed());

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.recv().await, Some(completed()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);
        sink.publish(completed());
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let (a, mut rx_a) = ChannelSink::new(4);
        let (b, mut rx_b) = ChannelSink::new(4);
        let fanout = FanoutSink::new()
            .with(Arc::new(a))
            .with(Arc::new(b))
            .with(Arc::new(NullSink));

        fanout.publish(completed());
        assert_eq!(fanout.len(), 3);
        assert_eq!(rx_a.try_recv().ok(), Some(completed()));
        assert_eq!(rx_b.try_recv().ok(), Some(completed()));
    }
}
