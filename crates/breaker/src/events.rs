//! Observer channel for breaker state transitions and metrics snapshots.
//!
//! Subscribers receive a [`BreakerEvent`] stream through a
//! [`tokio::sync::broadcast`] channel. Dropping the receiver unsubscribes.
//! Slow subscribers that fall more than the channel capacity behind see
//! `RecvError::Lagged` and skip ahead; the breaker never blocks on them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::circuit_breaker::CircuitState;
use crate::metrics::MetricsSnapshot;

/// Buffered events per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What caused a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Consecutive failures reached the failure threshold.
    FailureThreshold,
    /// A trial call failed while `HalfOpen`.
    TrialFailed,
    /// The reset timeout elapsed and a call was attempted.
    ResetTimeoutElapsed,
    /// The monitoring loop's health check reported healthy.
    HealthCheck,
    /// Consecutive `HalfOpen` successes reached the success threshold.
    SuccessThreshold,
    /// An operator called `reset`.
    ManualReset,
    /// An operator called `force_open`.
    ManualOpen,
}

/// A single state change of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    /// Breaker name.
    pub name: String,
    /// State before the transition.
    pub from: CircuitState,
    /// State after the transition.
    pub to: CircuitState,
    /// Why the transition happened.
    pub cause: TransitionCause,
    /// Wall-clock time of the transition.
    pub at: DateTime<Utc>,
}

/// Event published to breaker subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakerEvent {
    /// The breaker changed state.
    StateChanged(StateTransition),
    /// Periodic metrics snapshot from a monitoring tick.
    Metrics(MetricsSnapshot),
}

/// Fan-out of breaker events to any number of subscribers.
#[derive(Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<BreakerEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event (fire-and-forget). Having no subscribers is normal.
    pub(crate) fn publish(&self, event: BreakerEvent) {
        if self.tx.send(event).is_err() {
            trace!("no breaker event subscribers");
        }
    }
}
