//! Degraded responses for guarded calls.
//!
//! [`CircuitBreaker::execute`] never substitutes a result. Callers that want a
//! fallback payload use [`execute_with_fallback`], which consults the
//! breaker's configured [`FallbackFn`](crate::FallbackFn) on any breaker
//! error.

use std::fmt;
use std::future::Future;

use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::BreakerError;

/// Why a fallback was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The circuit was open and the operation was not invoked.
    CircuitOpen,
    /// The operation failed; carries the rendered error.
    OperationFailed(String),
    /// The operation exceeded the operation timeout.
    Timeout,
}

/// Input to a fallback producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackContext {
    /// Name of the breaker that guarded the call.
    pub breaker: String,
    /// What went wrong.
    pub reason: FallbackReason,
}

impl<E: fmt::Display> From<&BreakerError<E>> for FallbackReason {
    fn from(err: &BreakerError<E>) -> Self {
        match err {
            BreakerError::CircuitOpen { .. } => Self::CircuitOpen,
            BreakerError::OperationFailed(e) => Self::OperationFailed(e.to_string()),
            BreakerError::Timeout { .. } => Self::Timeout,
        }
    }
}

/// Run `operation` through `breaker`, answering with the configured fallback
/// payload if the call is rejected, fails, or times out.
///
/// Without a configured fallback the breaker error is returned unchanged.
pub async fn execute_with_fallback<F, Fut, E>(
    breaker: &CircuitBreaker,
    operation: F,
) -> Result<serde_json::Value, BreakerError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<serde_json::Value, E>>,
    E: fmt::Display,
{
    let err = match breaker.execute(operation).await {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let Some(fallback) = breaker.config().fallback.as_ref() else {
        return Err(err);
    };

    let context = FallbackContext {
        breaker: breaker.name().to_owned(),
        reason: FallbackReason::from(&err),
    };
    debug!(breaker = %context.breaker, reason = ?context.reason, "serving fallback");
    Ok(fallback(&context))
}
