use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitState;

/// Atomic counters tracking guarded call outcomes for one breaker.
///
/// All counters use relaxed ordering. `total_requests` is exact; the other
/// counters are eventually consistent with it under concurrent calls.
#[derive(Debug, Default)]
pub(crate) struct BreakerCounters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    timeouts: AtomicU64,
    rejected_requests: AtomicU64,
}

impl BreakerCounters {
    pub(crate) fn increment_total(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_successful(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    recorded_at: Instant,
    duration: Duration,
}

/// Bounded window of recent call durations.
///
/// Samples are appended in completion order, so the oldest sample is always
/// at the front. The window is capped at `max_samples`; the average is only
/// recomputed when [`recompute`](Self::recompute) runs (once per monitoring
/// tick), not per call.
#[derive(Debug)]
pub(crate) struct LatencyWindow {
    samples: VecDeque<Sample>,
    max_samples: usize,
    average: Duration,
}

impl LatencyWindow {
    pub(crate) fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.max(1),
            average: Duration::ZERO,
        }
    }

    pub(crate) fn record(&mut self, recorded_at: Instant, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample {
            recorded_at,
            duration,
        });
    }

    /// Drop samples recorded more than `max_age` before `now`.
    ///
    /// Returns the number of samples removed.
    pub(crate) fn prune(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.samples.len();
        while let Some(oldest) = self.samples.front() {
            if now.saturating_duration_since(oldest.recorded_at) > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        before - self.samples.len()
    }

    /// Recompute the mean of the retained samples. Zero when empty.
    pub(crate) fn recompute(&mut self) -> Duration {
        let count = self.samples.len();
        self.average = if count == 0 {
            Duration::ZERO
        } else {
            let total: u128 = self.samples.iter().map(|s| s.duration.as_nanos()).sum();
            let mean = total / count as u128;
            Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX))
        };
        self.average
    }

    pub(crate) fn average(&self) -> Duration {
        self.average
    }

    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Point-in-time view of one breaker's metrics.
///
/// Serializes to the JSON shape consumed by the observability and admin
/// collaborators:
///
/// ```json
/// {"name": "database", "state": "closed", "totalRequests": 12,
///  "successfulRequests": 11, "failedRequests": 1, "timeouts": 0,
///  "rejectedRequests": 0, "averageResponseTime": 4.2,
///  "lastFailureTime": "2026-01-01T00:00:00Z", "lastSuccessTime": null}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Breaker name.
    pub name: String,
    /// State at snapshot time.
    pub state: CircuitState,
    /// Every invocation attempt, including fail-fast rejections.
    pub total_requests: u64,
    /// Calls whose operation completed successfully.
    pub successful_requests: u64,
    /// Calls whose operation failed or timed out.
    pub failed_requests: u64,
    /// Calls that exceeded the operation timeout (subset of `failed_requests`).
    pub timeouts: u64,
    /// Calls rejected without running the operation.
    pub rejected_requests: u64,
    /// Mean call duration over the last monitoring window, in milliseconds.
    #[serde(rename = "averageResponseTime")]
    pub average_response_time_ms: f64,
    /// Wall-clock time of the most recent failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent success.
    pub last_success_time: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Fraction of attempted calls that failed, in `[0.0, 1.0]`.
    ///
    /// Rejections are excluded: they never reached the dependency.
    pub fn failure_rate(&self) -> f64 {
        let attempted = self.successful_requests + self.failed_requests;
        if attempted == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.failed_requests as f64 / attempted as f64;
            rate
        }
    }

    /// Mean response time as a [`Duration`].
    pub fn average_response_time(&self) -> Duration {
        Duration::from_secs_f64(self.average_response_time_ms / 1000.0)
    }
}
