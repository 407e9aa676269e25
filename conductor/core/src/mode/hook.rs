//! Guarded hook invocation
//!
//! Every call the core makes into a mode goes through [`invoke`], which bounds
//! it with a timeout and turns panics into ordinary failures. A broken plugin
//! can slow a single call down to its timeout; it cannot unwind into the
//! dispatcher or stall other sessions.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;

use super::contract::ModeError;

/// Why a hook call did not produce a value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookFailure {
    /// The call exceeded its bound and was cancelled
    TimedOut(Duration),
    /// The hook returned an error
    Failed(String),
    /// The hook panicked
    Panicked(String),
}

impl HookFailure {
    /// Whether the failure was a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(bound) => write!(f, "timed out after {}ms", bound.as_millis()),
            Self::Failed(reason) => write!(f, "{reason}"),
            Self::Panicked(reason) => write!(f, "panicked: {reason}"),
        }
    }
}

/// Run a hook future under `timeout`, catching panics
///
/// Dropping the inner future on timeout cancels the call.
pub async fn invoke<T, F>(call: F, timeout: Duration) -> Result<T, HookFailure>
where
    F: Future<Output = Result<T, ModeError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Err(_) => Err(HookFailure::TimedOut(timeout)),
        Ok(Err(payload)) => Err(HookFailure::Panicked(panic_message(payload.as_ref()))),
        Ok(Ok(Err(e))) => Err(HookFailure::Failed(e.to_string())),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_passes_value_through() {
        let result = invoke(async { Ok::<_, ModeError>(7) }, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_invoke_maps_errors() {
        let result: Result<(), _> =
            invoke(async { Err(ModeError::failed("boom")) }, Duration::from_secs(1)).await;
        assert_eq!(result, Err(HookFailure::Failed("boom".to_string())));
    }

    #[tokio::test]
    async fn test_invoke_times_out() {
        let result: Result<(), _> = invoke(
            async {
                futures::future::pending::<()>().await;
                Ok(())
            },
            Duration::from_millis(20),
        )
        .await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_invoke_catches_panics() {
        let result: Result<(), _> = invoke(
            async {
                if true {
                    panic!("plugin exploded");
                }
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(
            result,
            Err(HookFailure::Panicked("plugin exploded".to_string()))
        );
    }
}
