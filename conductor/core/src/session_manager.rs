//! Session Manager
//!
//! The single writer of session state. It owns the bounded session store,
//! serialises turns per session, and runs the switch protocol.
//!
//! # Design Philosophy
//!
//! The store is partitioned by session id: a `DashMap` finds the entry, and
//! each entry carries its own `tokio::sync::Mutex` around the [`Session`].
//! Two turns for the same session queue on that mutex; turns for different
//! sessions never touch the same lock. Each entry also keeps a lock-free
//! mirror of the active mode and the last-activity time, so introspection and
//! eviction never wait behind a running turn.
//!
//! # Switch Protocol
//!
//! ```text
//! admission slot for new mode ──► old.deactivate() ──► new.activate() ──► commit
//!        │ rejected                   │ failed               │ failed
//!        ▼                            ▼                      ▼
//!   AdmissionRejected        release slot, keep old   release slot,
//!                                                     re-activate old,
//!                                                     keep pointers
//!                                                            │ failed
//!                                                            ▼
//!                                                     drop old, release
//!                                                     its slot: RollbackFailed
//! ```
//!
//! Only the commit step moves the session onto a new mode, and it moves
//! `current_mode` and `previous_mode` together. A failed rollback is the one
//! case that clears `current_mode` without a commit, since the old mode is no
//! longer active.
//!
//! # Eviction
//!
//! The store holds at most `max_sessions` sessions. Creating one more evicts
//! the least-recently-active session that is not mid-turn; if every session is
//! mid-turn, creation fails with `SessionCapacity`. The evicted session's mode
//! is torn down on a detached task, so a slow `deactivate` never delays the
//! session being created. Sessions idle for longer
//! than `idle_timeout` are ended by [`SessionManager::evict_idle`], which
//! [`SessionManager::spawn_idle_reaper`] runs periodically.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;

use crate::admission::AdmissionControl;
use crate::error::{DispatchError, SwitchError};
use crate::events::{DispatchEvent, EventSink};
use crate::ids::{ModeId, SessionId};
use crate::mode::{hook, Mode, ModeContext};
use crate::registry::ModeRegistry;
use crate::session::{now_ms, Session};

/// Attempts to lock a live session before giving up
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Session store limits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum live sessions
    pub max_sessions: usize,
    /// Sessions idle longer than this are ended by `evict_idle`
    pub idle_timeout: Duration,
    /// Mode transitions kept per session
    pub max_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            idle_timeout: Duration::from_secs(30 * 60),
            max_history: 32,
        }
    }
}

// ============================================================================
// Entries and Guards
// ============================================================================

#[derive(Debug)]
struct SessionEntry {
    session: Arc<tokio::sync::Mutex<Session>>,
    /// Mirror of `Session::current_mode`, written only at commit/end
    mode: RwLock<Option<ModeId>>,
    last_active_ms: AtomicU64,
    busy: AtomicBool,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session: Arc::new(tokio::sync::Mutex::new(session)),
            mode: RwLock::new(None),
            last_active_ms: AtomicU64::new(now_ms()),
            busy: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        self.last_active_ms.store(now_ms(), Ordering::Release);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Cheap handle to a stored session
#[derive(Clone, Debug)]
pub struct SessionHandle(Arc<SessionEntry>);

impl SessionHandle {
    /// Lock the session for a turn
    ///
    /// Waits behind any turn already running for this session.
    pub async fn lock(&self) -> SessionGuard {
        let session = Arc::clone(&self.0.session).lock_owned().await;
        self.0.busy.store(true, Ordering::Release);
        self.0.touch();
        SessionGuard {
            session,
            entry: Arc::clone(&self.0),
        }
    }

    /// Active mode, read without locking
    #[must_use]
    pub fn current_mode(&self) -> Option<ModeId> {
        self.0.mode.read().clone()
    }

    /// Last activity (Unix ms)
    #[must_use]
    pub fn last_active_ms(&self) -> u64 {
        self.0.last_active_ms.load(Ordering::Acquire)
    }

    /// Whether a turn holds the session lock
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.0.is_busy()
    }
}

/// Exclusive access to a session for the duration of a turn
#[derive(Debug)]
pub struct SessionGuard {
    session: OwnedMutexGuard<Session>,
    entry: Arc<SessionEntry>,
}

impl SessionGuard {
    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn set_mirror(&self, mode: Option<ModeId>) {
        *self.entry.mode.write() = mode;
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.entry.touch();
        self.entry.busy.store(false, Ordering::Release);
    }
}

/// What `begin_switch` did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested mode was already active
    Unchanged,
    /// The session moved to a new mode
    Switched {
        /// Mode that was active before
        from: Option<ModeId>,
        /// Mode now active
        to: ModeId,
    },
}

// ============================================================================
// Session Manager
// ============================================================================

/// Ends sessions already removed from the store
#[derive(Clone)]
struct Teardown {
    registry: Arc<ModeRegistry>,
    admission: Arc<AdmissionControl>,
    sink: Arc<dyn EventSink>,
}

impl Teardown {
    /// Deactivate the entry's mode, release its slot and announce it
    async fn run(&self, id: &SessionId, entry: &SessionEntry) {
        let mut session = entry.session.lock().await;
        let Some(mode_id) = session.end() else {
            return;
        };
        *entry.mode.write() = None;

        if let Some(mode) = self.registry.get(&mode_id) {
            if let Err(failure) = hook::invoke(mode.deactivate(id), mode.definition().timeout()).await {
                tracing::warn!(
                    session = %id,
                    mode = %mode_id,
                    error = %failure,
                    "Deactivation failed while ending session"
                );
            }
        }
        self.admission.release(&mode_id);
        self.sink
            .publish(DispatchEvent::deactivated(mode_id, id.clone()));
    }
}

/// Bounded store of sessions and the switch protocol that mutates them
pub struct SessionManager {
    config: SessionConfig,
    registry: Arc<ModeRegistry>,
    admission: Arc<AdmissionControl>,
    sink: Arc<dyn EventSink>,
    teardown: Teardown,
    sessions: DashMap<SessionId, Arc<SessionEntry>>,
    /// Serialises the capacity check with the insert
    create_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create an empty store
    pub fn new(
        config: SessionConfig,
        registry: Arc<ModeRegistry>,
        admission: Arc<AdmissionControl>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let teardown = Teardown {
            registry: Arc::clone(&registry),
            admission: Arc::clone(&admission),
            sink: Arc::clone(&sink),
        };
        Self {
            config,
            registry,
            admission,
            sink,
            teardown,
            sessions: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Store limits
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Look a session up, creating it if needed
    ///
    /// At capacity, the least-recently-active idle session is evicted. Its
    /// mode is deactivated in the background; this call does not wait for it.
    ///
    /// # Errors
    ///
    /// [`DispatchError::SessionCapacity`] when the store is full and every
    /// session is mid-turn.
    pub async fn get_or_create(&self, id: &SessionId) -> Result<SessionHandle, DispatchError> {
        if let Some(entry) = self.lookup(id) {
            return Ok(SessionHandle(entry));
        }

        let (entry, evicted) = {
            let _create = self.create_lock.lock();
            if let Some(entry) = self.lookup(id) {
                return Ok(SessionHandle(entry));
            }

            let evicted = if self.sessions.len() >= self.config.max_sessions {
                let victim = self
                    .least_recently_active_idle()
                    .ok_or(DispatchError::SessionCapacity(self.config.max_sessions))?;
                self.sessions.remove(&victim)
            } else {
                None
            };

            let entry = Arc::new(SessionEntry::new(Session::new(
                id.clone(),
                self.config.max_history,
            )));
            self.sessions.insert(id.clone(), Arc::clone(&entry));
            (entry, evicted)
        };

        tracing::debug!(session = %id, live = self.sessions.len(), "Session created");

        if let Some((victim, victim_entry)) = evicted {
            tracing::info!(session = %victim, "Evicting least-recently-active session at capacity");
            let teardown = self.teardown.clone();
            tokio::spawn(async move {
                teardown.run(&victim, &victim_entry).await;
            });
        }

        Ok(SessionHandle(entry))
    }

    /// Get or create a session and lock it for a turn
    ///
    /// # Errors
    ///
    /// [`DispatchError::SessionCapacity`] as for `get_or_create`, or
    /// [`DispatchError::SessionEnded`] if the session keeps being ended
    /// underneath the caller.
    pub async fn acquire(&self, id: &SessionId) -> Result<SessionGuard, DispatchError> {
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let handle = self.get_or_create(id).await?;
            let guard = handle.lock().await;
            if !guard.is_ended() {
                return Ok(guard);
            }
            drop(guard);
            // Ended while we queued; drop the stale mapping and start fresh
            self.sessions
                .remove_if(id, |_, entry| Arc::ptr_eq(entry, &handle.0));
        }
        Err(DispatchError::SessionEnded(id.clone()))
    }

    /// Switch the locked session to `to`
    ///
    /// Takes an admission slot in `to`, deactivates the current mode, activates
    /// `to`, and only then moves the session's pointers. Any failure leaves
    /// the session in its prior state and gives the slot back.
    ///
    /// # Errors
    ///
    /// See [`SwitchError`].
    pub async fn begin_switch(
        &self,
        guard: &mut SessionGuard,
        to: &Arc<dyn Mode>,
        ctx: &ModeContext,
        confidence: f32,
    ) -> Result<SwitchOutcome, SwitchError> {
        let to_id = to.id().clone();
        if guard.current_mode() == Some(&to_id) {
            return Ok(SwitchOutcome::Unchanged);
        }

        self.admission.try_acquire(&to_id)?;

        let session_id = guard.id().clone();
        let from = guard.current_mode().cloned();
        let old_mode = from.as_ref().and_then(|id| self.registry.get(id)).cloned();

        if let Some(old) = &old_mode {
            if let Err(failure) =
                hook::invoke(old.deactivate(&session_id), old.definition().timeout()).await
            {
                self.admission.release(&to_id);
                tracing::warn!(
                    session = %session_id,
                    mode = %old.id(),
                    error = %failure,
                    "Deactivation failed, keeping current mode"
                );
                return Err(SwitchError::DeactivationFailed {
                    mode: old.id().clone(),
                    reason: failure.to_string(),
                });
            }
        }

        if let Err(failure) = hook::invoke(to.activate(ctx), to.definition().timeout()).await {
            self.admission.release(&to_id);
            tracing::warn!(
                session = %session_id,
                mode = %to_id,
                error = %failure,
                "Activation failed, rolling back switch"
            );
            if let Some(old) = &old_mode {
                if let Err(again) = hook::invoke(old.activate(ctx), old.definition().timeout()).await {
                    let previous = old.id().clone();
                    tracing::warn!(
                        session = %session_id,
                        mode = %previous,
                        error = %again,
                        "Could not re-activate previous mode, session left without a mode"
                    );
                    guard.session_mut().drop_mode();
                    guard.set_mirror(None);
                    self.admission.release(&previous);
                    self.sink
                        .publish(DispatchEvent::deactivated(previous.clone(), session_id));
                    return Err(SwitchError::RollbackFailed {
                        mode: to_id,
                        reason: failure.to_string(),
                        previous,
                        restore_reason: again.to_string(),
                    });
                }
            }
            return Err(SwitchError::ActivationFailed {
                mode: to_id,
                reason: failure.to_string(),
            });
        }

        if let Some(from) = &from {
            self.admission.release(from);
        }
        guard.session_mut().commit_switch(to_id.clone(), confidence);
        guard.set_mirror(Some(to_id.clone()));

        if let Some(from) = &from {
            self.sink
                .publish(DispatchEvent::deactivated(from.clone(), session_id.clone()));
        }
        self.sink
            .publish(DispatchEvent::activated(to_id.clone(), session_id.clone()));

        tracing::info!(
            session = %session_id,
            from = from.as_ref().map_or("none", ModeId::as_str),
            to = %to_id,
            confidence,
            "Mode switched"
        );

        Ok(SwitchOutcome::Switched { from, to: to_id })
    }

    /// Finish the locked session's turn, recording the selection confidence
    pub fn record_turn(&self, guard: &mut SessionGuard, confidence: f32) {
        guard.session_mut().record_turn(confidence);
    }

    /// End a session: deactivate its mode, release its slot, forget it
    ///
    /// Waits for a running turn to finish. Returns false if the session was
    /// not found.
    pub async fn end_session(&self, id: &SessionId) -> bool {
        let Some((id, entry)) = self.sessions.remove(id) else {
            return false;
        };
        self.teardown.run(&id, &entry).await;
        tracing::info!(session = %id, "Session ended");
        true
    }

    /// End every session idle for longer than `idle_timeout`
    ///
    /// Returns how many were ended.
    pub async fn evict_idle(&self) -> usize {
        let idle_ms = u64::try_from(self.config.idle_timeout.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms().saturating_sub(idle_ms);
        let is_stale =
            |entry: &Arc<SessionEntry>| !entry.is_busy() && entry.last_active_ms.load(Ordering::Acquire) < cutoff;

        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| is_stale(e.value()))
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for id in candidates {
            if let Some((id, entry)) = self.sessions.remove_if(&id, |_, e| is_stale(e)) {
                self.teardown.run(&id, &entry).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!(evicted, live = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run `evict_idle` every `interval` until the manager is dropped
    pub fn spawn_idle_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.evict_idle().await;
            }
            tracing::debug!("Idle reaper stopped");
        })
    }

    /// Active mode of a session, read without waiting for a running turn
    #[must_use]
    pub fn current_mode(&self, id: &SessionId) -> Option<ModeId> {
        self.lookup(id).and_then(|entry| entry.mode.read().clone())
    }

    /// Copy of a session's state (waits for a running turn)
    pub async fn snapshot(&self, id: &SessionId) -> Option<Session> {
        let entry = self.lookup(id)?;
        let session = entry.session.lock().await;
        Some(session.clone())
    }

    /// Whether a session is stored
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn lookup(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    fn least_recently_active_idle(&self) -> Option<SessionId> {
        self.sessions
            .iter()
            .filter(|e| !e.value().is_busy())
            .min_by_key(|e| e.value().last_active_ms.load(Ordering::Acquire))
            .map(|e| e.key().clone())
    }

}
