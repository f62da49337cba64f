use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::CircuitBreakerConfig;
use crate::error::{RegistryError, SettingsError};
use crate::registry::CircuitBreakerRegistry;

/// File-based circuit breaker settings.
///
/// Top-level values are the defaults; each `dependencies` entry overrides
/// them for one dependency. Durations are in milliseconds.
///
/// # Example
///
/// ```toml
/// [circuit_breaker]
/// failure_threshold = 5
/// success_threshold = 2
/// operation_timeout_ms = 10000
/// reset_timeout_ms = 60000
/// monitoring_interval_ms = 10000
///
/// [circuit_breaker.dependencies.database]
/// failure_threshold = 3
/// operation_timeout_ms = 2000
///
/// [circuit_breaker.dependencies.ai-provider]
/// reset_timeout_ms = 120000
/// fallback = { degraded = true, message = "AI features temporarily unavailable" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSettings {
    /// Default number of consecutive failures before opening the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Default number of consecutive successes in half-open state to close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Default operation timeout in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Default time in milliseconds before an open circuit admits a trial call.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Default monitoring loop period in milliseconds.
    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: u64,
    /// Default cap on retained latency samples.
    #[serde(default = "default_max_window_samples")]
    pub max_window_samples: usize,
    /// Default bound on concurrent half-open trials. Unbounded when absent.
    #[serde(default)]
    pub half_open_max_trials: Option<u32>,
    /// Per-dependency overrides.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySettings>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            operation_timeout_ms: default_operation_timeout_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            monitoring_interval_ms: default_monitoring_interval_ms(),
            max_window_samples: default_max_window_samples(),
            half_open_max_trials: None,
            dependencies: BTreeMap::new(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_monitoring_interval_ms() -> u64 {
    10_000
}

fn default_max_window_samples() -> usize {
    1000
}

/// Per-dependency overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencySettings {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: Option<u32>,
    /// Number of consecutive successes in half-open state to close the circuit.
    pub success_threshold: Option<u32>,
    /// Operation timeout in milliseconds.
    pub operation_timeout_ms: Option<u64>,
    /// Reset timeout in milliseconds.
    pub reset_timeout_ms: Option<u64>,
    /// Monitoring loop period in milliseconds.
    pub monitoring_interval_ms: Option<u64>,
    /// Cap on retained latency samples.
    pub max_window_samples: Option<usize>,
    /// Bound on concurrent half-open trials.
    pub half_open_max_trials: Option<u32>,
    /// Static payload served by `execute_with_fallback` when the call is
    /// rejected, fails, or times out.
    pub fallback: Option<serde_json::Value>,
}

/// TOML table holding the settings; also the name reported for invalid defaults.
const SECTION: &str = "circuit_breaker";

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    circuit_breaker: BreakerSettings,
}

impl BreakerSettings {
    /// Parse the `[circuit_breaker]` section of a TOML document.
    ///
    /// A document without the section yields the defaults. The defaults and
    /// every configured dependency are validated.
    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile = toml::from_str(source)?;
        let settings = file.circuit_breaker;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&contents)?;
        info!(
            path = %path.display(),
            dependencies = settings.dependencies.len(),
            "circuit breaker settings loaded"
        );
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        // Defaults apply to every dependency without a section of its own.
        self.resolve(SECTION, DependencySettings::default())
            .validate()
            .map_err(|source| SettingsError::Invalid {
                name: SECTION.to_owned(),
                source,
            })?;
        for name in self.dependencies.keys() {
            self.config_for(name)
                .validate()
                .map_err(|source| SettingsError::Invalid {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Names of dependencies with an explicit section, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.dependencies.keys().map(String::as_str).collect()
    }

    /// Resolve the breaker configuration for `name`: defaults plus any
    /// overrides from its `dependencies` section.
    ///
    /// Hooks that cannot come from a file (health checks, observers) are added
    /// by the caller with the `with_*` builders.
    pub fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        let overrides = self.dependencies.get(name).cloned().unwrap_or_default();
        self.resolve(name, overrides)
    }

    fn resolve(&self, name: &str, overrides: DependencySettings) -> CircuitBreakerConfig {
        let millis =
            |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        let mut config = CircuitBreakerConfig::new(name)
            .with_failure_threshold(
                overrides
                    .failure_threshold
                    .unwrap_or(self.failure_threshold),
            )
            .with_success_threshold(
                overrides
                    .success_threshold
                    .unwrap_or(self.success_threshold),
            )
            .with_operation_timeout(millis(
                overrides.operation_timeout_ms,
                self.operation_timeout_ms,
            ))
            .with_reset_timeout(millis(overrides.reset_timeout_ms, self.reset_timeout_ms))
            .with_monitoring_interval(millis(
                overrides.monitoring_interval_ms,
                self.monitoring_interval_ms,
            ))
            .with_max_window_samples(
                overrides
                    .max_window_samples
                    .unwrap_or(self.max_window_samples),
            );
        config.half_open_max_trials = overrides
            .half_open_max_trials
            .or(self.half_open_max_trials);

        if let Some(payload) = overrides.fallback {
            config = config.with_fallback(move |_| payload.clone());
        }
        config
    }

    /// Register a breaker for every dependency with an explicit section.
    ///
    /// Dependencies that are already registered are returned as-is.
    pub fn register_all(
        &self,
        registry: &CircuitBreakerRegistry,
    ) -> Result<Vec<Arc<CircuitBreaker>>, RegistryError> {
        self.dependencies
            .keys()
            .map(|name| registry.get_or_create(self.config_for(name)))
            .collect()
    }
}
