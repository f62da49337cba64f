use std::future::Future;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::circuit_breaker::{Admission, CircuitBreaker, FailureKind};
use crate::error::BreakerError;

impl CircuitBreaker {
    /// Run `operation` under this breaker's protection.
    ///
    /// The operation is raced against `operation_timeout`. While the circuit
    /// is open it is not invoked at all and the call fails fast with
    /// [`BreakerError::CircuitOpen`].
    ///
    /// On timeout the operation's future is dropped. Work it handed off to
    /// other tasks may still complete.
    ///
    /// ```
    /// use tripwire_breaker::{CircuitBreaker, CircuitBreakerConfig};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new("cache"));
    /// let value = breaker
    ///     .execute(|| async { Ok::<_, std::io::Error>(42) })
    ///     .await
    ///     .unwrap();
    /// assert_eq!(value, 42);
    /// # }
    /// ```
    #[instrument(skip_all, fields(breaker = %self.name()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.counters().increment_total();

        let Admission::Allowed(trial) = self.admit() else {
            return Err(BreakerError::CircuitOpen {
                name: self.name().to_owned(),
            });
        };

        let timeout = self.config().operation_timeout;
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, operation()).await;
        let elapsed = started.elapsed();
        self.record_duration(elapsed);

        let result = match outcome {
            Ok(Ok(value)) => {
                debug!(elapsed_ms = elapsed.as_millis(), "guarded call succeeded");
                self.record_success();
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(elapsed_ms = elapsed.as_millis(), "guarded call failed");
                self.record_failure(FailureKind::OperationFailed);
                Err(BreakerError::OperationFailed(err))
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis(),
                    "guarded call timed out"
                );
                self.record_failure(FailureKind::Timeout);
                Err(BreakerError::Timeout {
                    name: self.name().to_owned(),
                    timeout,
                })
            }
        };

        drop(trial);
        result
    }
}
