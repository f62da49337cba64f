use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::events::StateTransition;
use crate::fallback::FallbackContext;
use crate::health::HealthCheck;

/// Produces a substitute payload when a guarded call is rejected or fails.
pub type FallbackFn = Arc<dyn Fn(&FallbackContext) -> serde_json::Value + Send + Sync>;

/// Callback invoked after every state transition, outside the breaker lock.
pub type StateChangeObserver = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Configuration for a single dependency's circuit breaker.
///
/// Immutable once the breaker is created. Start from
/// [`CircuitBreakerConfig::new`] and adjust with the `with_*` methods:
///
/// ```
/// use std::time::Duration;
/// use tripwire_breaker::CircuitBreakerConfig;
///
/// let config = CircuitBreakerConfig::new("database")
///     .with_failure_threshold(3)
///     .with_reset_timeout(Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Unique dependency name; the registry key.
    pub name: String,
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Number of consecutive successes in `HalfOpen` state to close the circuit.
    pub success_threshold: u32,
    /// How long a guarded call may run before it is declared timed out.
    pub operation_timeout: Duration,
    /// How long to stay `Open` before a trial call is allowed through.
    pub reset_timeout: Duration,
    /// Period of the monitoring loop; also the age limit of latency samples.
    pub monitoring_interval: Duration,
    /// Upper bound on retained latency samples. Oldest samples go first.
    pub max_window_samples: usize,
    /// Maximum number of concurrent trial calls while `HalfOpen`.
    ///
    /// `None` admits every caller, which is the default.
    pub half_open_max_trials: Option<u32>,
    /// Optional fallback producer used by [`execute_with_fallback`](crate::execute_with_fallback).
    pub fallback: Option<FallbackFn>,
    /// Optional probe consulted by the monitoring loop while `Open`.
    pub health_check: Option<Arc<dyn HealthCheck>>,
    /// Optional callback fired on every state transition.
    pub on_state_change: Option<StateChangeObserver>,
}

impl CircuitBreakerConfig {
    /// Create a configuration with default thresholds for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the consecutive failures that open the circuit.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the consecutive `HalfOpen` successes that close the circuit.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set the time limit for each guarded call.
    #[must_use]
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set how long the circuit stays open before a trial call.
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set the monitoring period and latency sample age limit.
    #[must_use]
    pub fn with_monitoring_interval(mut self, interval: Duration) -> Self {
        self.monitoring_interval = interval;
        self
    }

    /// Set the number of latency samples kept between ticks.
    #[must_use]
    pub fn with_max_window_samples(mut self, samples: usize) -> Self {
        self.max_window_samples = samples;
        self
    }

    /// Bound the number of concurrent `HalfOpen` trial calls.
    ///
    /// Calls beyond the bound fail fast with `CircuitOpen` until an
    /// in-flight trial completes.
    #[must_use]
    pub fn with_half_open_max_trials(mut self, trials: u32) -> Self {
        self.half_open_max_trials = Some(trials);
        self
    }

    /// Set the fallback payload producer for degraded calls.
    #[must_use]
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&FallbackContext) -> serde_json::Value + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Set the probe the monitoring loop runs while open.
    #[must_use]
    pub fn with_health_check<H>(mut self, check: H) -> Self
    where
        H: HealthCheck + 'static,
    {
        self.health_check = Some(Arc::new(check));
        self
    }

    /// Set the callback fired on every state transition.
    #[must_use]
    pub fn with_state_change_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(observer));
        self
    }

    /// Validate configuration values.
    ///
    /// `reset_timeout = 0` is intentionally allowed (useful for testing).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.failure_threshold < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "failure_threshold",
                min: 1,
            });
        }
        if self.success_threshold < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "success_threshold",
                min: 1,
            });
        }
        if self.max_window_samples < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "max_window_samples",
                min: 1,
            });
        }
        if self.half_open_max_trials == Some(0) {
            return Err(ConfigError::BelowMinimum {
                field: "half_open_max_trials",
                min: 1,
            });
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("operation_timeout"));
        }
        if self.monitoring_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("monitoring_interval"));
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            failure_threshold: 5,
            success_threshold: 2,
            operation_timeout: Duration::from_secs(10),
            reset_timeout: Duration::from_secs(60),
            monitoring_interval: Duration::from_secs(10),
            max_window_samples: 1000,
            half_open_max_trials: None,
            fallback: None,
            health_check: None,
            on_state_change: None,
        }
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("operation_timeout", &self.operation_timeout)
            .field("reset_timeout", &self.reset_timeout)
            .field("monitoring_interval", &self.monitoring_interval)
            .field("max_window_samples", &self.max_window_samples)
            .field("half_open_max_trials", &self.half_open_max_trials)
            .field("fallback", &self.fallback.is_some())
            .field("health_check", &self.health_check.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}
