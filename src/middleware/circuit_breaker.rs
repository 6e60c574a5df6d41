use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::PipelineError;
use crate::core::event_context::EventContext;
use crate::core::event_result::EventResult;
use crate::events::event::Event;
use crate::events::event_middleware::{EventMiddleware, Next};
use crate::middleware::keyed::{KeyExtractor, KeyedRegistry, resolve_key};
use crate::middleware::order;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Circuit is closed, events flow normally
    Closed,
    /// Circuit is open, events are rejected without being attempted
    Open,
    /// Circuit is half-open, probe traffic tests whether the target recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF-OPEN"),
        }
    }
}

/// Thresholds and timeout shared by every per-key breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures while closed before the circuit opens
    pub failure_threshold: u32,
    /// Consecutive successes while half-open before the circuit closes
    pub success_threshold: u32,
    /// Time since the last failure before an open circuit lets a probe through
    pub reset_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Same threshold for opening and for closing again
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: threshold,
            success_threshold: threshold,
            reset_timeout,
        }
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

/// A state change worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Three-state circuit breaker for a single key
///
/// ```text
///   Closed ──(failure_threshold failures)──▶ Open
///     ▲                                       │
///     │                          reset_timeout since last failure
///     │                                       ▼
///     └──(success_threshold successes)── HalfOpen ──(any failure)──▶ Open
/// ```
///
/// All reads and writes of the counters happen under one lock, so the
/// Open → HalfOpen probe transition happens exactly once.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            reset_timeout: config.reset_timeout,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Whether a call may proceed, moving Open to HalfOpen once the reset
    /// timeout has passed
    pub fn allow(&self) -> (bool, Option<Transition>) {
        self.allow_at(Instant::now())
    }

    pub fn record_success(&self) -> Option<Transition> {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count < self.success_threshold {
                    return None;
                }
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.success_count = 0;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            // Late result from a call admitted before the circuit reopened
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&self) -> Option<Transition> {
        self.record_failure_at(Instant::now())
    }

    /// Force the breaker back to Closed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.success_count = 0;
        state.last_failure = None;
    }

    fn allow_at(&self, now: Instant) -> (bool, Option<Transition>) {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => (true, None),
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure
                    .is_none_or(|at| now.saturating_duration_since(at) > self.reset_timeout);
                if !cooled_down {
                    return (false, None);
                }

                state.state = CircuitState::HalfOpen;
                state.success_count = 0;
                (
                    true,
                    Some(Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                    }),
                )
            }
        }
    }

    fn record_failure_at(&self, now: Instant) -> Option<Transition> {
        let mut state = self.state.lock();

        match state.state {
            CircuitState::Closed => {
                state.last_failure = Some(now);
                state.failure_count += 1;
                if state.failure_count < self.failure_threshold {
                    return None;
                }
                state.state = CircuitState::Open;
                Some(Transition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            CircuitState::HalfOpen => {
                // A failing probe means the target has not recovered
                state.last_failure = Some(now);
                state.state = CircuitState::Open;
                state.success_count = 0;
                state.failure_count = self.failure_threshold;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            // Late result from a call admitted before the circuit opened;
            // the reset timeout keeps running from the failure that opened it
            CircuitState::Open => None,
        }
    }
}

/// Middleware that implements the circuit breaker pattern per key
///
/// Prevents cascading failures by rejecting events bound for a failing
/// target until it has had time to recover. The key defaults to the event
/// target; an empty key becomes `"default"`.
///
/// An open circuit aborts with [`PipelineError::CircuitOpen`] without
/// calling `next`. Otherwise the outcome of the rest of the chain is
/// recorded: deliveries and drops count as successes, and aborts for which
/// [`PipelineError::is_target_failure`] holds count as failures. Other
/// aborts (caller cancellation, a rejection by a stage placed after the
/// breaker) say nothing about the target and are not recorded.
///
/// # Example
///
/// ```ignore
/// use event_pipeline::middleware::circuit_breaker::{
///     CircuitBreakerConfig, CircuitBreakerMiddleware,
/// };
/// use std::time::Duration;
///
/// let breaker = CircuitBreakerMiddleware::new(
///     CircuitBreakerConfig::new(5, Duration::from_secs(30)).with_success_threshold(2),
/// );
/// ```
pub struct CircuitBreakerMiddleware {
    config: CircuitBreakerConfig,
    breakers: KeyedRegistry<CircuitBreaker>,
    key_extractor: KeyExtractor,
    order: i32,
}

impl CircuitBreakerMiddleware {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: KeyedRegistry::new(),
            key_extractor: Arc::new(|event: &Event| event.target.clone()),
            order: order::CIRCUIT_BREAKER,
        }
    }

    /// Resolve the breaker key from the event
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Event) -> String + Send + Sync + 'static,
    {
        self.key_extractor = Arc::new(extractor);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Current state for a key, if its breaker exists yet
    pub fn state(&self, key: &str) -> Option<CircuitState> {
        self.breakers.get(key).map(|breaker| breaker.state())
    }

    /// Manually reset one key's breaker to closed
    pub fn reset(&self, key: &str) {
        if let Some(breaker) = self.breakers.get(key) {
            breaker.reset();
            info!(key, "circuit breaker manually reset to CLOSED");
        }
    }

    fn breaker_for(&self, key: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .get_or_insert_with(key, || CircuitBreaker::new(&self.config))
    }
}

fn log_transition(key: &str, transition: Option<Transition>) {
    if let Some(Transition { from, to }) = transition {
        info!(key, %from, %to, "circuit breaker state change");
    }
}

impl EventMiddleware for CircuitBreakerMiddleware {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn process(&self, event: &mut Event, _ctx: &EventContext, next: &mut Next<'_>) -> EventResult {
        let key = resolve_key(&self.key_extractor, event);
        let breaker = self.breaker_for(&key);

        let (allowed, transition) = breaker.allow();
        log_transition(&key, transition);

        if !allowed {
            warn!(key = %key, event_id = %event.id, "circuit open, rejecting event");
            return EventResult::Aborted(PipelineError::CircuitOpen { key });
        }

        let result = next(event);

        let transition = match &result {
            EventResult::Delivered | EventResult::Dropped(_) => breaker.record_success(),
            EventResult::Aborted(err) if err.is_target_failure() => breaker.record_failure(),
            EventResult::Aborted(err) => {
                debug!(key = %key, stage = err.stage(), "abort not attributed to target");
                None
            }
        };
        log_transition(&key, transition);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig::new(
            threshold,
            Duration::from_millis(timeout_ms),
        ))
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = breaker(3, 1000);
        let now = Instant::now();

        assert_eq!(cb.record_failure_at(now), None);
        assert_eq!(cb.record_failure_at(now), None);
        assert_eq!(
            cb.record_failure_at(now),
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
        assert_eq!(cb.allow_at(now), (false, None));
        assert!(!cb.allow_at(now + Duration::from_millis(999)).0);
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = breaker(2, 1000);
        let now = Instant::now();

        cb.record_failure_at(now);
        cb.record_success();
        cb.record_failure_at(now);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn exactly_one_probe_moves_to_half_open() {
        let cb = breaker(1, 100);
        let now = Instant::now();
        cb.record_failure_at(now);

        let later = now + Duration::from_millis(101);
        let (allowed, transition) = cb.allow_at(later);
        assert!(allowed);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen
            })
        );

        // Already half-open: allowed, but no second transition
        assert_eq!(cb.allow_at(later), (true, None));
    }

    #[test]
    fn closes_after_success_threshold_in_half_open() {
        let cb = CircuitBreaker::new(
            &CircuitBreakerConfig::new(2, Duration::from_millis(50)).with_success_threshold(3),
        );
        let now = Instant::now();
        cb.record_failure_at(now);
        cb.record_failure_at(now);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_at(now + Duration::from_millis(60)).0);
        assert_eq!(cb.record_success(), None);
        assert_eq!(cb.record_success(), None);
        assert_eq!(
            cb.record_success(),
            Some(Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Closed
            })
        );
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let cb = breaker(5, 50);
        let now = Instant::now();
        for _ in 0..5 {
            cb.record_failure_at(now);
        }

        let probe_at = now + Duration::from_millis(60);
        assert!(cb.allow_at(probe_at).0);
        cb.record_success();
        assert_eq!(
            cb.record_failure_at(probe_at),
            Some(Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Open
            })
        );

        // The timeout restarts from the failed probe
        assert!(!cb.allow_at(probe_at + Duration::from_millis(10)).0);
        assert!(cb.allow_at(probe_at + Duration::from_millis(60)).0);
    }

    #[test]
    fn late_failure_while_open_keeps_the_original_timeout() {
        let cb = breaker(1, 100);
        let opened_at = Instant::now();
        cb.record_failure_at(opened_at);
        assert_eq!(cb.state(), CircuitState::Open);

        // An in-flight call admitted before the circuit opened fails late
        assert_eq!(cb.record_failure_at(opened_at + Duration::from_millis(70)), None);

        let (allowed, transition) = cb.allow_at(opened_at + Duration::from_millis(120));
        assert!(allowed);
        assert_eq!(
            transition,
            Some(Transition {
                from: CircuitState::Open,
                to: CircuitState::HalfOpen
            })
        );
    }

    #[test]
    fn reset_closes_the_circuit() {
        let cb = breaker(1, 60_000);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().0);
    }
}
