//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: one trial call admitted after the cooldown (opt-in)
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Closed: first can_execute() after the cooldown (count reset)
//! ```
//!
//! With `with_single_trial(true)` the post-cooldown call is guarded instead:
//! ```text
//! Open → Half-Open: first can_execute() after the cooldown (count reset)
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency (not global)
//! - No background timer: leaving Open happens inside can_execute()
//! - A Half-Open trial that never reports is abandoned after another cooldown
//! - The state mutex is only held for the read-modify-write, never across an await

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::observability::metrics;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Snapshot of breaker bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub state: CircuitState,
    /// When the current Half-Open trial was admitted.
    pub trial_started: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            state: CircuitState::Closed,
            trial_started: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Failure-counting circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    single_trial: bool,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            single_trial: false,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    /// Guard the post-cooldown call as a single Half-Open trial.
    pub fn with_single_trial(mut self, single_trial: bool) -> Self {
        self.single_trial = single_trial;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether a call may proceed right now.
    pub fn can_execute(&self) -> bool {
        let mut state = self.inner.lock().expect("circuit breaker mutex poisoned");
        let now = Instant::now();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = state
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) > self.cooldown);
                if !cooled {
                    return false;
                }
                state.failure_count = 0;
                if self.single_trial {
                    state.trial_started = Some(now);
                    self.transition(&mut state, CircuitState::HalfOpen);
                } else {
                    self.transition(&mut state, CircuitState::Closed);
                }
                true
            }
            CircuitState::HalfOpen => {
                // Trial owner went away without reporting; admit a fresh one.
                let abandoned = state
                    .trial_started
                    .map_or(true, |at| now.duration_since(at) > self.cooldown);
                if abandoned {
                    tracing::warn!(breaker = %self.name, "Half-open trial never reported, admitting a new one");
                    state.trial_started = Some(now);
                }
                abandoned
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.inner.lock().expect("circuit breaker mutex poisoned");
        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure = Some(Instant::now());

        match state.state {
            CircuitState::HalfOpen => {
                state.trial_started = None;
                self.transition(&mut state, CircuitState::Open);
            }
            CircuitState::Closed if state.failure_count >= self.failure_threshold => {
                self.transition(&mut state, CircuitState::Open);
            }
            _ => {
                tracing::debug!(
                    breaker = %self.name,
                    failures = state.failure_count,
                    state = state.state.as_str(),
                    "Failure recorded"
                );
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.inner.lock().expect("circuit breaker mutex poisoned");
        state.failure_count = 0;
        state.trial_started = None;
        if state.state != CircuitState::Closed {
            self.transition(&mut state, CircuitState::Closed);
        }
    }

    /// Copy of the current bookkeeping.
    pub fn snapshot(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker mutex poisoned").clone()
    }

    pub fn is_open(&self) -> bool {
        self.snapshot().is_open()
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) {
        let from = state.state;
        state.state = to;
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = from.as_str(),
                failures = state.failure_count,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            ),
            _ => tracing::info!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit state changed"
            ),
        }
        metrics::record_breaker_transition(&self.name, to.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("user-service", 3, Duration::from_secs(30))
    }

    fn guarded() -> CircuitBreaker {
        breaker().with_single_trial(true)
    }

    #[test]
    fn test_below_threshold_stays_closed() {
        let cb = breaker();
        assert!(cb.can_execute());
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert!(cb.can_execute());
        assert!(!cb.is_open());
        assert_eq!(cb.snapshot().failure_count, 2);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        let state = cb.snapshot();
        assert!(state.is_open());
        assert_eq!(state.failure_count, 3);
        assert!(!cb.can_execute());
    }

    #[test]
    fn test_success_resets_count() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.snapshot().failure_count, 0);

        // Two more failures are no longer enough to trip.
        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_execute());
    }

    #[test]
    fn test_success_closes_open_circuit() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        cb.record_success();
        let state = cb.snapshot();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_closes_and_resets() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cb.can_execute());
        let state = cb.snapshot();
        assert_eq!(state.failure_count, 0);
        assert!(!state.is_open());
        assert_eq!(state.state, CircuitState::Closed);

        // Closed again: every caller passes, and one failure does not reopen.
        assert!(cb.can_execute());
        assert!(cb.can_execute());
        cb.record_failure();
        cb.record_failure();
        assert!(!cb.is_open());
        assert!(cb.can_execute());

        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_cooldown_enters_half_open() {
        let cb = guarded();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(cb.can_execute());
        let state = cb.snapshot();
        assert_eq!(state.failure_count, 0);
        assert!(!state.is_open());
        assert_eq!(state.state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_boundary_is_exclusive() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let cb = guarded();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        assert!(cb.can_execute());
        assert!(!cb.can_execute());
        assert!(!cb.can_execute());

        cb.record_success();
        assert_eq!(cb.snapshot().state, CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens() {
        let cb = guarded();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());

        cb.record_failure();
        assert!(cb.is_open());
        assert!(!cb.can_execute());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_replaced() {
        let cb = guarded();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cb.can_execute());
        assert!(!cb.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_while_open_extends_cooldown() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_secs(20)).await;
        cb.record_failure();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!cb.can_execute());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cb.can_execute());
    }
}
