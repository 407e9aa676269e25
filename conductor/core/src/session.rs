//! Sessions
//!
//! Per-conversation state: which mode is active, which one was active before
//! it, how confident the last selection was, and a short history of switches.
//!
//! # Design Philosophy
//!
//! A session is plain data with private fields. Only the session manager can
//! change it (through `pub(crate)` mutators), and it only ever does so while
//! holding the session's lock. Modes and the recognizer see read-only views.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::{ModeId, SessionId};

/// Current Unix time in milliseconds
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Waiting for the next turn
    Idle,
    /// A turn is in progress
    Busy,
    /// Ended by the host or evicted; no further turns
    Ended,
}

/// One committed mode switch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeTransition {
    /// Mode that was active before (none on the first switch)
    pub from: Option<ModeId>,
    /// Mode that became active
    pub to: ModeId,
    /// Selection confidence that caused the switch
    pub confidence: f32,
    /// Turn on which the switch happened
    pub turn: u64,
    /// When (Unix ms)
    pub at_ms: u64,
}

/// The turn a session is currently running
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTurn {
    /// Turn number
    pub turn: u64,
    /// Mode processing it (set once switching is over)
    pub mode: Option<ModeId>,
    /// When it started (Unix ms)
    pub started_at_ms: u64,
}

/// Session timestamps and counters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the session was created (Unix ms)
    pub created_at: u64,
    /// When the session last did anything (Unix ms)
    pub last_active_at: u64,
    /// Completed turns
    pub turn_count: u64,
    /// Committed switches
    pub switch_count: u64,
}

impl SessionMetadata {
    fn new() -> Self {
        let now = now_ms();
        Self {
            created_at: now,
            last_active_at: now,
            turn_count: 0,
            switch_count: 0,
        }
    }

    fn touch(&mut self) {
        self.last_active_at = now_ms();
    }
}

/// A conversation session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    current_mode: Option<ModeId>,
    previous_mode: Option<ModeId>,
    last_confidence: Option<f32>,
    metadata: SessionMetadata,
    active_turn: Option<ActiveTurn>,
    history: VecDeque<ModeTransition>,
    /// Maximum transitions kept (0 = none)
    max_history: usize,
}

impl Session {
    /// Create an idle session with no active mode
    #[must_use]
    pub fn new(id: SessionId, max_history: usize) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            current_mode: None,
            previous_mode: None,
            last_confidence: None,
            metadata: SessionMetadata::new(),
            active_turn: None,
            history: VecDeque::with_capacity(max_history.min(64)),
            max_history,
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has ended
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    /// Active mode, if any
    #[must_use]
    pub fn current_mode(&self) -> Option<&ModeId> {
        self.current_mode.as_ref()
    }

    /// Mode that was active before the last committed switch
    #[must_use]
    pub fn previous_mode(&self) -> Option<&ModeId> {
        self.previous_mode.as_ref()
    }

    /// Selection confidence recorded on the last completed turn
    #[must_use]
    pub fn last_confidence(&self) -> Option<f32> {
        self.last_confidence
    }

    /// Completed turns
    #[must_use]
    pub fn turn_count(&self) -> u64 {
        self.metadata.turn_count
    }

    /// Timestamps and counters
    #[must_use]
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Turn currently in progress
    #[must_use]
    pub fn active_turn(&self) -> Option<&ActiveTurn> {
        self.active_turn.as_ref()
    }

    /// Recent switches, oldest first
    pub fn history(&self) -> impl Iterator<Item = &ModeTransition> {
        self.history.iter()
    }

    // ------------------------------------------------------------------------
    // Mutators (session manager only)
    // ------------------------------------------------------------------------

    /// Mark a turn as started; returns its number
    pub(crate) fn begin_turn(&mut self) -> u64 {
        let turn = self.metadata.turn_count + 1;
        self.state = SessionState::Busy;
        self.active_turn = Some(ActiveTurn {
            turn,
            mode: None,
            started_at_ms: now_ms(),
        });
        self.metadata.touch();
        turn
    }

    /// Record which mode is processing the current turn
    pub(crate) fn set_turn_mode(&mut self, mode: &ModeId) {
        if let Some(turn) = self.active_turn.as_mut() {
            turn.mode = Some(mode.clone());
        }
    }

    /// Commit a switch: both pointers move together
    pub(crate) fn commit_switch(&mut self, to: ModeId, confidence: f32) {
        let from = self.current_mode.take();
        let turn = self
            .active_turn
            .as_ref()
            .map_or(self.metadata.turn_count, |t| t.turn);

        self.history.push_back(ModeTransition {
            from: from.clone(),
            to: to.clone(),
            confidence,
            turn,
            at_ms: now_ms(),
        });
        self.prune_history();

        if from.is_some() {
            self.previous_mode = from;
        }
        self.current_mode = Some(to);
        self.metadata.switch_count += 1;
        self.metadata.touch();
    }

    /// Forget a mode that could not be kept active
    ///
    /// It becomes `previous_mode`; the next commit leaves that pointer alone.
    pub(crate) fn drop_mode(&mut self) -> Option<ModeId> {
        let dropped = self.current_mode.take();
        if dropped.is_some() {
            self.previous_mode.clone_from(&dropped);
            self.metadata.touch();
        }
        dropped
    }

    /// Finish the current turn
    pub(crate) fn record_turn(&mut self, confidence: f32) {
        self.metadata.turn_count += 1;
        self.last_confidence = Some(confidence);
        self.active_turn = None;
        if self.state == SessionState::Busy {
            self.state = SessionState::Idle;
        }
        self.metadata.touch();
    }

    /// Abandon the current turn without counting it
    pub(crate) fn abort_turn(&mut self) {
        self.active_turn = None;
        if self.state == SessionState::Busy {
            self.state = SessionState::Idle;
        }
    }

    /// End the session; returns the mode that was active
    pub(crate) fn end(&mut self) -> Option<ModeId> {
        self.state = SessionState::Ended;
        self.active_turn = None;
        self.current_mode.take()
    }

    fn prune_history(&mut self) {
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}
