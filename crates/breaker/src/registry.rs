use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::info;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::CircuitBreakerConfig;
use crate::error::RegistryError;
use crate::metrics::MetricsSnapshot;
use crate::monitor::{self, MonitorHandle};

struct Registered {
    breaker: Arc<CircuitBreaker>,
    /// `None` once [`CircuitBreakerRegistry::shutdown`] has stopped the loop.
    monitor: Option<MonitorHandle>,
}

/// Registry of circuit breakers keyed by dependency name.
///
/// Every registered breaker gets its own monitoring loop. Loops stop when
/// the breaker is removed, on [`shutdown`](Self::shutdown), or when the
/// registry is dropped.
///
/// Create it once at startup and share it (for example behind an `Arc`);
/// there is no process-global registry.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Registered>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new breaker and start its monitoring loop.
    ///
    /// Fails if the configuration is invalid, a breaker with the same name
    /// already exists, or no Tokio runtime is running.
    pub fn create(
        &self,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, RegistryError> {
        let mut breakers = self.breakers.write();
        if breakers.contains_key(&config.name) {
            return Err(RegistryError::AlreadyRegistered(config.name));
        }
        Self::insert(&mut breakers, config)
    }

    /// Return the breaker registered under `config.name`, creating it if
    /// absent. An existing breaker keeps its original configuration.
    pub fn get_or_create(
        &self,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, RegistryError> {
        let mut breakers = self.breakers.write();
        if let Some(existing) = breakers.get(&config.name) {
            return Ok(Arc::clone(&existing.breaker));
        }
        Self::insert(&mut breakers, config)
    }

    fn insert(
        breakers: &mut HashMap<String, Registered>,
        config: CircuitBreakerConfig,
    ) -> Result<Arc<CircuitBreaker>, RegistryError> {
        config
            .validate()
            .map_err(|source| RegistryError::InvalidConfig {
                name: config.name.clone(),
                source,
            })?;
        Handle::try_current().map_err(|_| RegistryError::NoRuntime)?;

        let name = config.name.clone();
        let breaker = Arc::new(CircuitBreaker::new(config));
        let monitor = monitor::spawn(Arc::clone(&breaker));

        info!(
            breaker = %name,
            failure_threshold = breaker.config().failure_threshold,
            success_threshold = breaker.config().success_threshold,
            "circuit breaker registered"
        );
        breakers.insert(
            name,
            Registered {
                breaker: Arc::clone(&breaker),
                monitor: Some(monitor),
            },
        );
        Ok(breaker)
    }

    /// Look up the circuit breaker for a dependency.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .get(name)
            .map(|registered| Arc::clone(&registered.breaker))
    }

    /// Remove a breaker and stop its monitoring loop.
    ///
    /// Callers still holding the breaker can keep using it; it is simply no
    /// longer monitored.
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let registered = self.breakers.write().remove(name)?;
        info!(breaker = %name, "circuit breaker removed");
        Some(registered.breaker)
    }

    /// Metrics snapshot of every registered breaker, keyed by name.
    pub fn all_metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.breakers
            .read()
            .iter()
            .map(|(name, registered)| (name.clone(), registered.breaker.metrics()))
            .collect()
    }

    /// Force every breaker to `Closed` with counters zeroed.
    pub fn reset_all(&self) {
        // Observers run inside `reset`, so release the map lock first.
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .values()
            .map(|registered| Arc::clone(&registered.breaker))
            .collect();
        for breaker in &breakers {
            breaker.reset();
        }
        info!(count = breakers.len(), "all circuit breakers reset");
    }

    /// Return a sorted list of all registered dependency names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Return the number of registered circuit breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Return `true` if no circuit breakers are registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Stop every monitoring loop and wait for them to exit.
    ///
    /// Breakers stay registered and usable; they are no longer monitored.
    pub async fn shutdown(&self) {
        let monitors: Vec<MonitorHandle> = self
            .breakers
            .write()
            .values_mut()
            .filter_map(|registered| registered.monitor.take())
            .collect();

        let count = monitors.len();
        for mut monitor in monitors {
            monitor.shutdown().await;
        }
        info!(count, "circuit breaker monitoring stopped");
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::circuit_breaker::CircuitState;
    use crate::error::ConfigError;

    use super::*;

    fn default_config(name: &str) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(name)
            .with_failure_threshold(1)
            .with_monitoring_interval(Duration::from_secs(1))
    }

    #[test]
    fn empty_registry() {
        let reg = CircuitBreakerRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
        assert!(reg.names().is_empty());
        assert!(reg.all_metrics().is_empty());
    }

    #[test]
    fn registry_default_is_empty() {
        let reg = CircuitBreakerRegistry::default();
        assert!(reg.is_empty());
    }

    #[test]
    fn create_outside_runtime_fails() {
        let reg = CircuitBreakerRegistry::new();
        assert_eq!(
            reg.create(default_config("db")).unwrap_err(),
            RegistryError::NoRuntime
        );
        assert!(reg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn create_and_get() {
        let reg = CircuitBreakerRegistry::new();
        reg.create(default_config("database")).unwrap();
        reg.create(default_config("cache")).unwrap();

        assert_eq!(reg.len(), 2);
        assert!(!reg.is_empty());
        assert!(reg.get("database").is_some());
        assert!(reg.get("cache").is_some());
        assert!(reg.get("payments").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_same_instance() {
        let reg = CircuitBreakerRegistry::new();
        let created = reg.create(default_config("database")).unwrap();
        let looked_up = reg.get("database").unwrap();
        assert!(Arc::ptr_eq(&created, &looked_up));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_name_is_rejected() {
        let reg = CircuitBreakerRegistry::new();
        let first = reg.create(default_config("database")).unwrap();

        let err = reg
            .create(default_config("database").with_failure_threshold(9))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered("database".into()));

        // The original breaker and config are untouched.
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&first, &reg.get("database").unwrap()));
        assert_eq!(first.config().failure_threshold, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_create_reuses_existing() {
        let reg = CircuitBreakerRegistry::new();
        let first = reg.get_or_create(default_config("cache")).unwrap();
        let second = reg
            .get_or_create(default_config("cache").with_failure_threshold(7))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().failure_threshold, 1);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_is_rejected() {
        let reg = CircuitBreakerRegistry::new();
        let err = reg
            .create(default_config("db").with_success_threshold(0))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidConfig {
                name: "db".into(),
                source: ConfigError::BelowMinimum {
                    field: "success_threshold",
                    min: 1,
                },
            }
        );
        assert!(reg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn names_sorted() {
        let reg = CircuitBreakerRegistry::new();
        reg.create(default_config("slack")).unwrap();
        reg.create(default_config("email")).unwrap();
        reg.create(default_config("webhook")).unwrap();

        assert_eq!(reg.names(), vec!["email", "slack", "webhook"]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_metrics_keyed_by_name() {
        let reg = CircuitBreakerRegistry::new();
        let db = reg.create(default_config("database")).unwrap();
        reg.create(default_config("cache")).unwrap();

        db.execute(|| async { Ok::<_, std::io::Error>(()) })
            .await
            .unwrap();

        let metrics = reg.all_metrics();
        assert_eq!(
            metrics.keys().cloned().collect::<Vec<_>>(),
            vec!["cache", "database"]
        );
        assert_eq!(metrics["database"].total_requests, 1);
        assert_eq!(metrics["cache"].total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_all_closes_every_breaker() {
        let reg = CircuitBreakerRegistry::new();
        for name in ["database", "cache"] {
            let cb = reg.create(default_config(name)).unwrap();
            cb.force_open();
        }

        reg.reset_all();

        for snapshot in reg.all_metrics().values() {
            assert_eq!(snapshot.state, CircuitState::Closed);
        }
        assert_eq!(reg.get("cache").unwrap().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_stops_monitoring() {
        let reg = CircuitBreakerRegistry::new();
        let cb = reg.create(default_config("database")).unwrap();

        let removed = reg.remove("database").unwrap();
        assert!(Arc::ptr_eq(&cb, &removed));
        assert!(reg.get("database").is_none());
        assert!(reg.remove("database").is_none());

        drop(removed);
        tokio::time::sleep(Duration::from_secs(3)).await;
        // Only our handle remains once the loop task is gone.
        assert_eq!(Arc::strong_count(&cb), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_loops_but_keeps_breakers() {
        let reg = CircuitBreakerRegistry::new();
        let cb = reg.create(default_config("database")).unwrap();
        let mut rx = cb.subscribe();

        reg.shutdown().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(reg.len(), 1);
        assert!(
            cb.execute(|| async { Ok::<_, std::io::Error>(()) })
                .await
                .is_ok()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_registry_stops_loops() {
        let reg = CircuitBreakerRegistry::new();
        let cb = reg.create(default_config("database")).unwrap();

        drop(reg);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(Arc::strong_count(&cb), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_lists_names() {
        let reg = CircuitBreakerRegistry::new();
        reg.create(default_config("database")).unwrap();
        let debug = format!("{reg:?}");
        assert!(debug.contains("database"));
    }
}
