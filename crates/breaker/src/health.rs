use std::future::Future;

use async_trait::async_trait;

use crate::error::HealthCheckError;

/// Probe used by the monitoring loop to decide whether an `Open` breaker may
/// move to `HalfOpen` before its reset timeout elapses.
///
/// `Ok(true)` means healthy. `Ok(false)` and `Err(_)` both mean unhealthy;
/// errors are logged and swallowed.
///
/// Any `Fn() -> impl Future<Output = Result<bool, HealthCheckError>>` closure
/// implements this trait:
///
/// ```
/// use tripwire_breaker::{CircuitBreakerConfig, HealthCheckError};
///
/// let config = CircuitBreakerConfig::new("cache")
///     .with_health_check(|| async { Ok::<_, HealthCheckError>(true) });
/// assert!(config.health_check.is_some());
/// ```
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probe the dependency.
    async fn check(&self) -> Result<bool, HealthCheckError>;
}

#[async_trait]
impl<F, Fut> HealthCheck for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, HealthCheckError>> + Send,
{
    async fn check(&self) -> Result<bool, HealthCheckError> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysDown;

    #[async_trait]
    impl HealthCheck for AlwaysDown {
        async fn check(&self) -> Result<bool, HealthCheckError> {
            Err("connection refused".into())
        }
    }

    #[tokio::test]
    async fn closure_health_check() {
        let check = || async { Ok::<_, HealthCheckError>(true) };
        assert!(check.check().await.unwrap());
    }

    #[tokio::test]
    async fn trait_object_health_check() {
        let check: Box<dyn HealthCheck> = Box::new(AlwaysDown);
        let err = check.check().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
