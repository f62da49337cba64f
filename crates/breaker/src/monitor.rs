//! Periodic monitoring loop for a single breaker.
//!
//! Each tick:
//! - prunes latency samples older than `monitoring_interval`
//! - recomputes the average response time
//! - probes the health check while `Open`, moving to `HalfOpen` when healthy
//! - publishes a [`BreakerEvent::Metrics`] snapshot

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState, deadline_after};
use crate::events::BreakerEvent;
use crate::health::HealthCheck;
use crate::metrics::MetricsSnapshot;

/// Run one monitoring tick against `breaker`.
///
/// The spawned loop calls this every `monitoring_interval`; it is public so a
/// tick can also be driven on demand. Returns the published snapshot.
pub async fn tick(breaker: &CircuitBreaker) -> MetricsSnapshot {
    let (pruned, samples, average) = breaker.refresh_latency(Instant::now());
    debug!(
        breaker = %breaker.name(),
        pruned,
        samples,
        average_ms = average.as_millis(),
        "latency window refreshed"
    );

    if breaker.state() == CircuitState::Open
        && let Some(check) = breaker.config().health_check.clone()
    {
        probe(breaker, check.as_ref()).await;
    }

    let snapshot = breaker.metrics();
    breaker.publish(BreakerEvent::Metrics(snapshot.clone()));
    snapshot
}

/// Invoke the health check, bounded by the operation timeout.
///
/// Failures are logged and never propagate.
async fn probe(breaker: &CircuitBreaker, check: &dyn HealthCheck) {
    let timeout = breaker.config().operation_timeout;
    match tokio::time::timeout(timeout, check.check()).await {
        Ok(Ok(true)) => {
            if breaker.half_open_from_health_check().is_none() {
                debug!(
                    breaker = %breaker.name(),
                    "health check passed but breaker already left open state"
                );
            }
        }
        Ok(Ok(false)) => {
            debug!(breaker = %breaker.name(), "health check reported unhealthy");
        }
        Ok(Err(e)) => {
            warn!(breaker = %breaker.name(), error = %e, "health check failed");
        }
        Err(_) => {
            warn!(
                breaker = %breaker.name(),
                timeout_ms = timeout.as_millis(),
                "health check timed out"
            );
        }
    }
}

/// Handle to a spawned monitoring loop.
///
/// Dropping the handle aborts the loop. Use [`shutdown`](Self::shutdown) to
/// stop it and wait for the task to finish.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the loop to stop and wait for it to exit.
    ///
    /// A tick already in progress (including a pending health check) is
    /// allowed to finish first. Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
            && e.is_panic()
        {
            warn!(error = %e, "monitoring loop panicked");
        }
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Spawn the monitoring loop for `breaker` on the current Tokio runtime.
///
/// The first tick fires one `monitoring_interval` after the call.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn spawn(breaker: Arc<CircuitBreaker>) -> MonitorHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let period = breaker.config().monitoring_interval;

    let task = tokio::spawn(async move {
        info!(
            breaker = %breaker.name(),
            interval_ms = period.as_millis(),
            "monitoring loop started"
        );

        let mut timer = tokio::time::interval_at(deadline_after(period), period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(breaker = %breaker.name(), "monitoring loop received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    tick(&breaker).await;
                }
            }
        }
    });

    MonitorHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    }
}
