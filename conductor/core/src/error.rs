//! Error types
//!
//! One `thiserror` enum per concern. Only [`RegistryError`] is fatal; the rest
//! are recovered by the dispatcher and end up as a failed `ModeResult`.

use thiserror::Error;

use crate::ids::{ModeId, SessionId};

/// Load-time errors raised while building the registry
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two modes share an id
    #[error("duplicate mode id: {0}")]
    DuplicateModeId(ModeId),

    /// A definition failed validation
    #[error("invalid mode definition '{id}': {reason}")]
    InvalidDefinition {
        /// Offending mode id (may be empty)
        id: String,
        /// What is wrong with it
        reason: String,
    },

    /// The configured default mode is not registered
    #[error("default mode '{0}' is not registered")]
    UnknownDefaultMode(ModeId),

    /// The configured default mode is disabled
    #[error("default mode '{0}' is disabled")]
    DefaultModeDisabled(ModeId),
}

/// Why a session could not switch modes
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    /// The target mode is at its concurrent-session ceiling
    #[error("mode '{mode}' is at its limit of {limit} concurrent sessions")]
    AdmissionRejected {
        /// Target mode
        mode: ModeId,
        /// Its configured ceiling
        limit: usize,
    },

    /// The target mode's `activate` failed, timed out or panicked
    #[error("activation of '{mode}' failed: {reason}")]
    ActivationFailed {
        /// Target mode
        mode: ModeId,
        /// Failure description
        reason: String,
    },

    /// The outgoing mode's `deactivate` failed, timed out or panicked
    #[error("deactivation of '{mode}' failed: {reason}")]
    DeactivationFailed {
        /// Outgoing mode
        mode: ModeId,
        /// Failure description
        reason: String,
    },

    /// The target mode's `activate` failed and the outgoing mode could not
    /// be re-activated either; the session is left with no active mode
    #[error("activation of '{mode}' failed and '{previous}' could not be restored: {restore_reason}")]
    RollbackFailed {
        /// Target mode
        mode: ModeId,
        /// Why the target failed
        reason: String,
        /// Mode that was active before the switch
        previous: ModeId,
        /// Why re-activating it failed
        restore_reason: String,
    },

    /// The target mode is not in the registry
    #[error("unknown mode: {0}")]
    UnknownMode(ModeId),
}

/// Typed failures of a dispatched turn
///
/// The dispatcher never returns these to `submit_turn` callers directly; they
/// are rendered into the diagnostic of a failed result and logged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Scoring exceeded its bound for a mode
    #[error("recognition timed out for mode '{0}'")]
    RecognitionTimeout(ModeId),

    /// No admissible mode could take the session
    #[error("mode '{mode}' rejected the session: limit of {limit} reached")]
    AdmissionRejected {
        /// Rejecting mode
        mode: ModeId,
        /// Its ceiling
        limit: usize,
    },

    /// Activation failed and the default mode could not take over either
    #[error("activation failed for '{mode}': {reason}")]
    ActivationFailed {
        /// Last mode tried
        mode: ModeId,
        /// Failure description
        reason: String,
    },

    /// The outgoing mode refused to deactivate
    #[error("deactivation failed for '{mode}': {reason}")]
    DeactivationFailed {
        /// Outgoing mode
        mode: ModeId,
        /// Failure description
        reason: String,
    },

    /// The active mode's `process` failed
    #[error("processing failed in '{mode}': {reason}")]
    ProcessingFailed {
        /// Active mode
        mode: ModeId,
        /// Failure description
        reason: String,
    },

    /// The session store is full and nothing can be evicted
    #[error("session capacity of {0} reached and every session is busy")]
    SessionCapacity(usize),

    /// The session was ended
    #[error("session '{0}' has ended")]
    SessionEnded(SessionId),

    /// The utterance was empty or too long
    #[error("invalid utterance: {0}")]
    InvalidUtterance(String),
}

impl From<SwitchError> for DispatchError {
    fn from(err: SwitchError) -> Self {
        match err {
            SwitchError::AdmissionRejected { mode, limit } => {
                Self::AdmissionRejected { mode, limit }
            }
            SwitchError::ActivationFailed { mode, reason }
            | SwitchError::RollbackFailed { mode, reason, .. } => {
                Self::ActivationFailed { mode, reason }
            }
            SwitchError::DeactivationFailed { mode, reason } => {
                Self::DeactivationFailed { mode, reason }
            }
            SwitchError::UnknownMode(mode) => Self::ActivationFailed {
                reason: format!("unknown mode '{mode}'"),
                mode,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_error_converts_to_dispatch_error() {
        let err: DispatchError = SwitchError::AdmissionRejected {
            mode: ModeId::from("debugging"),
            limit: 1,
        }
        .into();
        assert_eq!(
            err,
            DispatchError::AdmissionRejected {
                mode: ModeId::from("debugging"),
                limit: 1
            }
        );

        let err: DispatchError = SwitchError::UnknownMode(ModeId::from("ghost")).into();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_deactivation_failure_keeps_its_phase() {
        let err: DispatchError = SwitchError::DeactivationFailed {
            mode: ModeId::from("sticky"),
            reason: "deactivate refused".to_string(),
        }
        .into();
        assert_eq!(
            err,
            DispatchError::DeactivationFailed {
                mode: ModeId::from("sticky"),
                reason: "deactivate refused".to_string()
            }
        );
        assert!(err.to_string().starts_with("deactivation failed"));
    }
}
