//! Admission Control
//!
//! Enforces each mode's `max_concurrent_sessions` ceiling. A session holds one
//! slot in the mode that is active for it; the slot is taken before the mode
//! is activated and given back when the session switches away or ends.
//!
//! The table of counters is built once from the registry and never resized,
//! so acquiring and releasing a slot is a lock-free compare-and-swap on a
//! single atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::error::SwitchError;
use crate::ids::ModeId;
use crate::registry::ModeRegistry;

/// Per-mode slot counter
#[derive(Debug)]
struct ModeSlots {
    /// `None` means unlimited
    limit: Option<usize>,
    active: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl ModeSlots {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view of one mode's slots
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdmissionSnapshot {
    /// Mode id
    pub mode: ModeId,
    /// Sessions currently holding a slot
    pub active: usize,
    /// Configured ceiling (`None` = unlimited)
    pub limit: Option<usize>,
    /// Highest `active` value seen
    pub peak: usize,
    /// Slots handed out since startup
    pub admitted: u64,
    /// Requests refused since startup
    pub rejected: u64,
}

/// Concurrency ceilings for every registered mode
#[derive(Debug)]
pub struct AdmissionControl {
    slots: HashMap<ModeId, ModeSlots>,
    order: Vec<ModeId>,
}

impl AdmissionControl {
    /// Build counters for every mode in `registry`
    #[must_use]
    pub fn from_registry(registry: &ModeRegistry) -> Self {
        let mut slots = HashMap::with_capacity(registry.len());
        let mut order = Vec::with_capacity(registry.len());
        for mode in registry.iter() {
            let definition = mode.definition();
            slots.insert(
                definition.id.clone(),
                ModeSlots::new(definition.max_concurrent_sessions),
            );
            order.push(definition.id.clone());
        }
        Self { slots, order }
    }

    /// Try to take a slot in `mode` without waiting
    ///
    /// # Errors
    ///
    /// [`SwitchError::AdmissionRejected`] when the mode is at its ceiling,
    /// [`SwitchError::UnknownMode`] when it is not registered.
    pub fn try_acquire(&self, mode: &ModeId) -> Result<(), SwitchError> {
        let slots = self
            .slots
            .get(mode)
            .ok_or_else(|| SwitchError::UnknownMode(mode.clone()))?;

        let Some(limit) = slots.limit else {
            let now = slots.active.fetch_add(1, Ordering::AcqRel) + 1;
            slots.peak.fetch_max(now, Ordering::Relaxed);
            slots.admitted.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let mut current = slots.active.load(Ordering::Relaxed);
        loop {
            if current >= limit {
                slots.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(SwitchError::AdmissionRejected {
                    mode: mode.clone(),
                    limit,
                });
            }

            match slots.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    slots.peak.fetch_max(current + 1, Ordering::Relaxed);
                    slots.admitted.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Give a slot back
    ///
    /// Releasing more slots than were taken saturates at zero.
    pub fn release(&self, mode: &ModeId) {
        let Some(slots) = self.slots.get(mode) else {
            return;
        };
        let released = slots
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |n| n.checked_sub(1));
        if released.is_err() {
            tracing::warn!(mode = %mode, "Released an admission slot that was not held");
        }
    }

    /// Sessions currently holding a slot in `mode`
    #[must_use]
    pub fn active_count(&self, mode: &ModeId) -> usize {
        self.slots
            .get(mode)
            .map_or(0, |s| s.active.load(Ordering::Acquire))
    }

    /// Whether `mode` has room for one more session
    #[must_use]
    pub fn has_capacity(&self, mode: &ModeId) -> bool {
        self.slots.get(mode).is_some_and(|s| {
            s.limit
                .map_or(true, |limit| s.active.load(Ordering::Acquire) < limit)
        })
    }

    /// Snapshot of every mode, in registry order
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdmissionSnapshot> {
        self.order
            .iter()
            .filter_map(|id| {
                self.slots.get(id).map(|s| AdmissionSnapshot {
                    mode: id.clone(),
                    active: s.active.load(Ordering::Relaxed),
                    limit: s.limit,
                    peak: s.peak.load(Ordering::Relaxed),
                    admitted: s.admitted.load(Ordering::Relaxed),
                    rejected: s.rejected.load(Ordering::Relaxed),
                })
            })
            .collect()
    }
}
