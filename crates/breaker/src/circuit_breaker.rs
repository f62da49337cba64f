use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::CircuitBreakerConfig;
use crate::events::{BreakerEvent, EventBus, StateTransition, TransitionCause};
use crate::metrics::{BreakerCounters, LatencyWindow, MetricsSnapshot};

/// Stand-in for "never" when a configured duration overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, clamped to [`FAR_FUTURE`] when the sum would overflow.
pub(crate) fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or(now + FAR_FUTURE)
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through to the dependency.
    Closed,
    /// Calls fail fast until the reset timeout elapses.
    Open,
    /// Trial calls probe whether the dependency has recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Classification of a failed guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// The operation itself returned an error.
    OperationFailed,
    /// The operation exceeded the operation timeout.
    Timeout,
}

/// Internal mutable state for a single circuit breaker.
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Earliest instant a trial call is allowed. Only consulted while `Open`.
    next_attempt_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    /// Trial calls currently running while `HalfOpen`. Only tracked when
    /// `half_open_max_trials` is configured.
    trials_in_flight: u32,
    /// Bumped on every transition so permits from an earlier episode never
    /// release slots of a later one.
    generation: u64,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            next_attempt_at: None,
            last_failure_time: None,
            last_success_time: None,
            trials_in_flight: 0,
            generation: 0,
        }
    }
}

/// Result of asking the breaker whether a call may proceed.
pub(crate) enum Admission<'a> {
    /// Run the operation. Holds a trial slot when `HalfOpen` trials are bounded.
    Allowed(Option<TrialPermit<'a>>),
    /// Fail fast without running the operation.
    Rejected,
}

/// Bounded `HalfOpen` trial slot, released on drop.
pub(crate) struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        let mut data = self.breaker.write();
        if data.generation == self.generation && data.state == CircuitState::HalfOpen {
            data.trials_in_flight = data.trials_in_flight.saturating_sub(1);
        }
    }
}

/// Circuit breaker for a single downstream dependency.
///
/// Tracks dependency health and transitions between states:
/// - `Closed` (normal) -> `Open` (failing) when consecutive failures reach the threshold
/// - `Open` -> `HalfOpen` (trial) once the reset timeout has elapsed and a call
///   is attempted, or earlier when the health check reports healthy
/// - `HalfOpen` -> `Closed` after consecutive successes reach the threshold
/// - `HalfOpen` -> `Open` on any failure
///
/// All transition decisions happen under one write lock, so racing callers
/// produce exactly one transition event per crossing. Observers are notified
/// after the lock is released.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    data: RwLock<CircuitData>,
    counters: BreakerCounters,
    window: Mutex<LatencyWindow>,
    events: EventBus,
}

impl CircuitBreaker {
    /// Create a new circuit breaker from `config`.
    ///
    /// The configuration is not validated here; the registry validates
    /// before constructing.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = LatencyWindow::new(config.max_window_samples);
        Self {
            config,
            data: RwLock::new(CircuitData::new()),
            counters: BreakerCounters::default(),
            window: Mutex::new(window),
            events: EventBus::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CircuitData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CircuitData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self) -> MutexGuard<'_, LatencyWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may run, transitioning `Open` -> `HalfOpen`
    /// when the reset timeout has elapsed.
    pub(crate) fn admit(&self) -> Admission<'_> {
        let (admission, transition) = {
            let mut data = self.write();
            let mut transition = None;

            if data.state == CircuitState::Open {
                let now = Instant::now();
                if let Some(next_attempt_at) = data.next_attempt_at
                    && now < next_attempt_at
                {
                    drop(data);
                    self.reject("circuit open");
                    return Admission::Rejected;
                }
                transition = Some(self.transition(
                    &mut data,
                    CircuitState::HalfOpen,
                    TransitionCause::ResetTimeoutElapsed,
                ));
            }

            let mut permit = None;
            if data.state == CircuitState::HalfOpen
                && let Some(max_trials) = self.config.half_open_max_trials
            {
                if data.trials_in_flight >= max_trials {
                    drop(data);
                    self.reject("half-open trial limit reached");
                    return Admission::Rejected;
                }
                data.trials_in_flight += 1;
                permit = Some(TrialPermit {
                    breaker: self,
                    generation: data.generation,
                });
            }

            (Admission::Allowed(permit), transition)
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
        admission
    }

    fn reject(&self, reason: &'static str) {
        self.counters.increment_rejected();
        debug!(breaker = %self.config.name, reason, "call rejected");
    }

    /// Record a successful call.
    ///
    /// Returns the transition if this success closed the circuit.
    pub(crate) fn record_success(&self) -> Option<StateTransition> {
        self.counters.increment_successful();

        let transition = {
            let mut data = self.write();
            data.last_success_time = Some(Utc::now());
            data.consecutive_failures = 0;
            data.consecutive_successes = data.consecutive_successes.saturating_add(1);

            if data.state == CircuitState::HalfOpen
                && data.consecutive_successes >= self.config.success_threshold
            {
                Some(self.transition(
                    &mut data,
                    CircuitState::Closed,
                    TransitionCause::SuccessThreshold,
                ))
            } else {
                None
            }
        };

        if let Some(ref transition) = transition {
            self.notify(transition.clone());
        }
        transition
    }

    /// Record a failed call.
    ///
    /// Returns the transition if this failure opened the circuit.
    pub(crate) fn record_failure(&self, kind: FailureKind) -> Option<StateTransition> {
        self.counters.increment_failed();
        if kind == FailureKind::Timeout {
            self.counters.increment_timeouts();
        }

        let transition = {
            let mut data = self.write();
            data.last_failure_time = Some(Utc::now());
            data.consecutive_successes = 0;
            data.consecutive_failures = data.consecutive_failures.saturating_add(1);

            match data.state {
                CircuitState::Closed
                    if data.consecutive_failures >= self.config.failure_threshold =>
                {
                    Some(self.transition(
                        &mut data,
                        CircuitState::Open,
                        TransitionCause::FailureThreshold,
                    ))
                }
                CircuitState::HalfOpen => Some(self.transition(
                    &mut data,
                    CircuitState::Open,
                    TransitionCause::TrialFailed,
                )),
                _ => None,
            }
        };

        if let Some(ref transition) = transition {
            self.notify(transition.clone());
        }
        transition
    }

    /// Move `Open` -> `HalfOpen` because the health check reported healthy.
    ///
    /// No-op unless the breaker is still `Open` when the lock is taken.
    pub(crate) fn half_open_from_health_check(&self) -> Option<StateTransition> {
        let transition = {
            let mut data = self.write();
            (data.state == CircuitState::Open).then(|| {
                self.transition(
                    &mut data,
                    CircuitState::HalfOpen,
                    TransitionCause::HealthCheck,
                )
            })
        };

        if let Some(ref transition) = transition {
            self.notify(transition.clone());
        }
        transition
    }

    /// Apply a transition under the write lock. The caller notifies.
    fn transition(
        &self,
        data: &mut CircuitData,
        to: CircuitState,
        cause: TransitionCause,
    ) -> StateTransition {
        let from = data.state;
        data.state = to;
        data.generation = data.generation.wrapping_add(1);
        data.trials_in_flight = 0;

        match to {
            CircuitState::Open => {
                data.consecutive_successes = 0;
                data.next_attempt_at = Some(deadline_after(self.config.reset_timeout));
                info!(
                    breaker = %self.config.name,
                    %from,
                    failures = data.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    reset_timeout_ms = self.config.reset_timeout.as_millis(),
                    ?cause,
                    "circuit breaker opening"
                );
            }
            CircuitState::HalfOpen => {
                data.consecutive_failures = 0;
                data.consecutive_successes = 0;
                info!(
                    breaker = %self.config.name,
                    ?cause,
                    "circuit breaker transitioning from open to half-open"
                );
            }
            CircuitState::Closed => {
                data.consecutive_failures = 0;
                data.consecutive_successes = 0;
                data.next_attempt_at = None;
                info!(
                    breaker = %self.config.name,
                    %from,
                    ?cause,
                    "circuit breaker closing"
                );
            }
        }

        StateTransition {
            name: self.config.name.clone(),
            from,
            to,
            cause,
            at: Utc::now(),
        }
    }

    fn notify(&self, transition: StateTransition) {
        if let Some(observer) = &self.config.on_state_change {
            observer(&transition);
        }
        self.events.publish(BreakerEvent::StateChanged(transition));
    }

    pub(crate) fn publish(&self, event: BreakerEvent) {
        self.events.publish(event);
    }

    /// Add a call duration to the latency window.
    pub(crate) fn record_duration(&self, duration: Duration) {
        self.window().record(Instant::now(), duration);
    }

    /// Prune stale latency samples and recompute the average.
    ///
    /// Returns `(pruned, remaining, average)`.
    pub(crate) fn refresh_latency(&self, now: Instant) -> (usize, usize, Duration) {
        let mut window = self.window();
        let pruned = window.prune(now, self.config.monitoring_interval);
        let average = window.recompute();
        (pruned, window.len(), average)
    }

    pub(crate) fn counters(&self) -> &BreakerCounters {
        &self.counters
    }

    /// Reset the circuit breaker to `Closed` state with counters zeroed.
    ///
    /// Operator override; bypasses normal transition rules. Request metrics
    /// are cumulative and are kept.
    pub fn reset(&self) {
        let transition = {
            let mut data = self.write();
            if data.state == CircuitState::Closed {
                data.consecutive_failures = 0;
                data.consecutive_successes = 0;
                data.next_attempt_at = None;
                data.trials_in_flight = 0;
                None
            } else {
                Some(self.transition(&mut data, CircuitState::Closed, TransitionCause::ManualReset))
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    /// Force the circuit open, rejecting calls until the reset timeout elapses.
    ///
    /// Operator override; bypasses normal transition rules. If already open,
    /// only the retry deadline is pushed out.
    pub fn force_open(&self) {
        let transition = {
            let mut data = self.write();
            if data.state == CircuitState::Open {
                data.next_attempt_at = Some(deadline_after(self.config.reset_timeout));
                None
            } else {
                Some(self.transition(&mut data, CircuitState::Open, TransitionCause::ManualOpen))
            }
        };

        if let Some(transition) = transition {
            self.notify(transition);
        }
    }

    /// Get current state without triggering transitions.
    pub fn state(&self) -> CircuitState {
        self.read().state
    }

    /// Point-in-time metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        let (state, last_failure_time, last_success_time) = {
            let data = self.read();
            (data.state, data.last_failure_time, data.last_success_time)
        };
        let average = self.window().average();

        MetricsSnapshot {
            name: self.config.name.clone(),
            state,
            total_requests: self.counters.total_requests(),
            successful_requests: self.counters.successful_requests(),
            failed_requests: self.counters.failed_requests(),
            timeouts: self.counters.timeouts(),
            rejected_requests: self.counters.rejected_requests(),
            average_response_time_ms: average.as_secs_f64() * 1000.0,
            last_failure_time,
            last_success_time,
        }
    }

    /// Earliest instant a trial call is allowed. Only meaningful while `Open`.
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.read().next_attempt_at
    }

    /// Current consecutive failure count.
    pub fn consecutive_failures(&self) -> u32 {
        self.read().consecutive_failures
    }

    /// Current consecutive success count.
    pub fn consecutive_successes(&self) -> u32 {
        self.read().consecutive_successes
    }

    /// Subscribe to state transitions and metrics snapshots.
    ///
    /// Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Get the configuration for this circuit breaker.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the dependency name.
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.read();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("config", &self.config)
            .field("state", &data.state)
            .field("consecutive_failures", &data.consecutive_failures)
            .field("consecutive_successes", &data.consecutive_successes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn default_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("test")
            .with_failure_threshold(3)
            .with_success_threshold(2)
            .with_reset_timeout(Duration::from_secs(60))
    }

    fn zero_reset(failure_threshold: u32, success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("test")
            .with_failure_threshold(failure_threshold)
            .with_success_threshold(success_threshold)
            .with_reset_timeout(Duration::ZERO)
    }

    /// Helper: admit a call and return the state it runs under.
    fn admit_state(cb: &CircuitBreaker) -> Option<CircuitState> {
        match cb.admit() {
            Admission::Allowed(_) => Some(cb.state()),
            Admission::Rejected => None,
        }
    }

    fn fail(cb: &CircuitBreaker) -> Option<StateTransition> {
        cb.record_failure(FailureKind::OperationFailed)
    }

    // -- CircuitState tests ---------------------------------------------------

    #[test]
    fn circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }

    #[test]
    fn circuit_state_serializes_snake_case() {
        let json = serde_json::to_value(CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "half_open");
    }

    // -- State transition tests -----------------------------------------------

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new(default_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(admit_state(&cb), Some(CircuitState::Closed));
        assert!(cb.next_attempt_at().is_none());
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = CircuitBreaker::new(default_config());

        // Two failures - still closed (threshold is 3)
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        // Third failure trips the circuit
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.next_attempt_at().is_some());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(default_config());

        fail(&cb);
        fail(&cb);
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);

        // Need 3 more consecutive failures to trip
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failure_resets_success_count() {
        let cb = CircuitBreaker::new(default_config());
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.consecutive_successes(), 2);

        fail(&cb);
        assert_eq!(cb.consecutive_successes(), 0);
        assert_eq!(cb.consecutive_failures(), 1);
    }

    #[test]
    fn rapid_alternation_never_trips() {
        let cb = CircuitBreaker::new(default_config());

        for _ in 0..100 {
            fail(&cb);
            fail(&cb);
            cb.record_success();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn open_rejects_before_reset_timeout() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));

        fail(&cb);
        assert_eq!(admit_state(&cb), None);
        assert_eq!(admit_state(&cb), None);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.counters().rejected_requests(), 2);
    }

    #[test]
    fn half_open_to_closed_after_successes() {
        let cb = CircuitBreaker::new(zero_reset(1, 2));

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        // Reset timeout is zero, so the next admission moves to HalfOpen.
        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_to_open_on_failure() {
        let cb = CircuitBreaker::new(zero_reset(1, 3));

        fail(&cb);
        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));
        cb.record_success();
        cb.record_success();

        // One failure is enough regardless of accumulated successes.
        let t = fail(&cb).expect("should transition");
        assert_eq!(t.from, CircuitState::HalfOpen);
        assert_eq!(t.to, CircuitState::Open);
        assert_eq!(t.cause, TransitionCause::TrialFailed);
        assert_eq!(cb.consecutive_successes(), 0);
    }

    #[test]
    fn half_open_entry_resets_both_counters() {
        let cb = CircuitBreaker::new(zero_reset(2, 2));
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.consecutive_failures(), 2);

        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.consecutive_successes(), 0);
    }

    #[test]
    fn success_in_open_state_does_not_transition() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));

        fail(&cb);
        assert!(cb.record_success().is_none());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn failure_in_open_state_returns_none() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));

        fail(&cb);
        let deadline = cb.next_attempt_at();
        assert!(fail(&cb).is_none());
        assert_eq!(cb.next_attempt_at(), deadline);
    }

    #[test]
    fn timeout_failure_counts_both() {
        let cb = CircuitBreaker::new(default_config());
        cb.record_failure(FailureKind::Timeout);
        let m = cb.metrics();
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.timeouts, 1);
        assert!(m.last_failure_time.is_some());
    }

    #[test]
    fn full_lifecycle_multiple_cycles() {
        let cb = CircuitBreaker::new(zero_reset(2, 1));

        // Cycle 1: Closed -> Open -> HalfOpen -> Closed
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        // Cycle 2: trip, fail the trial, then recover
        fail(&cb);
        fail(&cb);
        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(admit_state(&cb), Some(CircuitState::HalfOpen));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    // -- Health check transition ----------------------------------------------

    #[test]
    fn health_check_transition_only_from_open() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));
        assert!(cb.half_open_from_health_check().is_none());

        fail(&cb);
        let t = cb.half_open_from_health_check().expect("should transition");
        assert_eq!(t.cause, TransitionCause::HealthCheck);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second attempt is a no-op.
        assert!(cb.half_open_from_health_check().is_none());
    }

    // -- Operator overrides ---------------------------------------------------

    #[test]
    fn reset_returns_to_closed() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.next_attempt_at().is_none());
        // Request metrics are cumulative.
        assert_eq!(cb.metrics().failed_requests, 1);
    }

    #[test]
    fn reset_when_closed_clears_counters_without_event() {
        let cb = CircuitBreaker::new(default_config());
        let mut rx = cb.subscribe();
        fail(&cb);
        cb.reset();
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn force_open_rejects_calls() {
        let cb = CircuitBreaker::new(default_config());
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(admit_state(&cb), None);
    }

    #[test]
    fn unbounded_reset_timeout_trips_without_overflow() {
        let cb = CircuitBreaker::new(
            default_config()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::MAX),
        );
        assert!(cb.config().validate().is_ok());

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(admit_state(&cb), None);
        assert!(cb.next_attempt_at().is_some_and(|at| at > Instant::now()));

        // Pushing the deadline out again takes the same path.
        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    // -- Observers ------------------------------------------------------------

    #[test]
    fn observer_sees_every_transition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = CircuitBreaker::new(zero_reset(1, 1).with_state_change_observer(move |t| {
            sink.lock().unwrap().push((t.from, t.to));
        }));

        fail(&cb);
        admit_state(&cb);
        cb.record_success();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn subscriber_receives_transition_events() {
        let cb = CircuitBreaker::new(default_config().with_failure_threshold(1));
        let mut rx = cb.subscribe();

        fail(&cb);

        match rx.try_recv().expect("event should be queued") {
            BreakerEvent::StateChanged(t) => {
                assert_eq!(t.name, "test");
                assert_eq!(t.to, CircuitState::Open);
                assert_eq!(t.cause, TransitionCause::FailureThreshold);
            }
            other @ BreakerEvent::Metrics(_) => panic!("unexpected event: {other:?}"),
        }
    }

    // -- Bounded half-open trials ---------------------------------------------

    #[test]
    fn unbounded_half_open_admits_everyone() {
        let cb = CircuitBreaker::new(zero_reset(1, 5));
        fail(&cb);

        let permits: Vec<_> = (0..10).map(|_| cb.admit()).collect();
        assert!(permits.iter().all(|a| matches!(a, Admission::Allowed(None))));
    }

    #[test]
    fn bounded_half_open_rejects_excess_trials() {
        let cb = CircuitBreaker::new(zero_reset(1, 2).with_half_open_max_trials(1));
        fail(&cb);

        let first = cb.admit();
        assert!(matches!(first, Admission::Allowed(Some(_))));
        assert!(matches!(cb.admit(), Admission::Rejected));

        // Completing the trial frees the slot.
        cb.record_success();
        drop(first);
        assert!(matches!(cb.admit(), Admission::Allowed(Some(_))));
    }

    #[test]
    fn stale_permit_does_not_release_new_episode_slot() {
        let cb = CircuitBreaker::new(zero_reset(1, 2).with_half_open_max_trials(1));
        fail(&cb);

        let stale = cb.admit();
        // Trial fails; the breaker reopens and a new episode begins.
        fail(&cb);
        let current = cb.admit();
        assert!(matches!(current, Admission::Allowed(Some(_))));

        drop(stale);
        assert!(matches!(cb.admit(), Admission::Rejected));
        drop(current);
    }

    // -- Concurrency tests ----------------------------------------------------

    #[test]
    fn concurrent_record_operations() {
        let cb = Arc::new(CircuitBreaker::new(
            default_config().with_failure_threshold(100),
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    cb.record_failure(FailureKind::OperationFailed);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        // 10 threads * 10 failures = 100, which equals the threshold
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().failed_requests, 100);
    }

    #[test]
    fn concurrent_half_open_entry_fires_once() {
        let transitions = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&transitions);
        let cb = Arc::new(CircuitBreaker::new(
            zero_reset(1, 100).with_state_change_observer(move |t| {
                if t.to == CircuitState::HalfOpen {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        ));
        cb.record_failure(FailureKind::OperationFailed);

        let barrier = Arc::new(std::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cb = Arc::clone(&cb);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                matches!(cb.admit(), Admission::Allowed(_))
            }));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 16);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn concurrent_mixed_operations_no_panic() {
        let cb = Arc::new(CircuitBreaker::new(zero_reset(3, 2)));

        let mut handles = Vec::new();
        for i in 0..50 {
            let cb = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || match i % 4 {
                0 => {
                    cb.record_failure(FailureKind::OperationFailed);
                }
                1 => {
                    cb.record_success();
                }
                2 => {
                    let _ = cb.admit();
                }
                3 => cb.reset(),
                _ => unreachable!(),
            }));
        }

        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        let _ = cb.state();
    }

    #[test]
    fn debug_format() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::new("database"));
        let debug = format!("{cb:?}");
        assert!(debug.contains("database"));
        assert!(debug.contains("Closed"));
    }
}
