use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute).
///
/// `E` is the error type of the wrapped operation. Keeping it generic lets
/// callers tell "downstream said no" ([`OperationFailed`](Self::OperationFailed))
/// apart from "downstream never answered" ([`Timeout`](Self::Timeout)) and
/// from "we did not even ask" ([`CircuitOpen`](Self::CircuitOpen)).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen {
        /// Name of the rejecting breaker.
        name: String,
    },

    /// The wrapped operation returned an error.
    #[error("operation failed: {0}")]
    OperationFailed(#[source] E),

    /// The wrapped operation did not complete within the operation timeout.
    #[error("circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout {
        /// Name of the breaker that timed the call out.
        name: String,
        /// The configured operation timeout.
        timeout: Duration,
    },
}

impl<E> BreakerError<E> {
    /// Whether this error belongs to the "service unavailable" class.
    ///
    /// `CircuitOpen` and `Timeout` mean the dependency could not be reached;
    /// `OperationFailed` means it answered with an error.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::Timeout { .. })
    }

    /// Return the wrapped operation error, if this is `OperationFailed`.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure reported by a [`HealthCheck`](crate::HealthCheck) probe.
///
/// Never surfaced to callers of `execute`; the monitoring loop treats it as
/// "unhealthy" and moves on.
#[derive(Debug, Clone, Error)]
#[error("health check failed: {0}")]
pub struct HealthCheckError(pub String);

impl From<String> for HealthCheckError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HealthCheckError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

/// Invalid [`CircuitBreakerConfig`](crate::CircuitBreakerConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The breaker name is empty.
    #[error("breaker name must not be empty")]
    EmptyName,

    /// A numeric field is below its minimum.
    #[error("{field} must be >= {min}")]
    BelowMinimum {
        /// Offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: u64,
    },

    /// A duration field is zero where a positive value is required.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Errors from [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A breaker with this name is already registered.
    #[error("circuit breaker already registered: {0}")]
    AlreadyRegistered(String),

    /// The supplied configuration failed validation.
    #[error("invalid configuration for '{name}': {source}")]
    InvalidConfig {
        /// Name from the rejected configuration.
        name: String,
        /// Validation failure.
        #[source]
        source: ConfigError,
    },

    /// No Tokio runtime is available to run the monitoring loop.
    #[error("circuit breaker registry requires a running Tokio runtime")]
    NoRuntime,
}

/// Errors loading [`BreakerSettings`](crate::BreakerSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid TOML or does not match the schema.
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// A dependency's resolved configuration is invalid.
    #[error("invalid settings for '{name}': {source}")]
    Invalid {
        /// Dependency name.
        name: String,
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
}
