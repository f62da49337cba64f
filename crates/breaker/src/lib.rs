//! Circuit breakers for downstream dependencies.
//!
//! Each dependency (database, cache, AI provider, third-party API) gets a
//! [`CircuitBreaker`] that fails fast while the dependency is unhealthy,
//! races every call against a timeout, and is watched by a background
//! monitoring loop. Breakers live in an explicit [`CircuitBreakerRegistry`].

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod events;
mod execute;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod settings;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, FallbackFn, StateChangeObserver};
pub use error::{BreakerError, ConfigError, HealthCheckError, RegistryError, SettingsError};
pub use events::{BreakerEvent, StateTransition, TransitionCause};
pub use fallback::{FallbackContext, FallbackReason, execute_with_fallback};
pub use health::HealthCheck;
pub use metrics::MetricsSnapshot;
pub use monitor::MonitorHandle;
pub use registry::CircuitBreakerRegistry;
pub use settings::{BreakerSettings, DependencySettings};
