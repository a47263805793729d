//! Per-backend circuit breakers.
//!
//! Each breaker is a tagged state machine. Callers acquire a [`Permit`]
//! before contacting the backend and report the outcome against it; outcomes
//! from permits issued before the last transition are ignored, so a slow
//! response from a previous phase cannot close or reopen the circuit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bastion_core::GatewayMetrics;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Breaker tuning, usually the `breaker` section of the gateway config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct BreakerSettings {
    /// Outcomes kept in the rolling window.
    pub window_size: usize,
    /// Outcomes required before the failure rate is evaluated.
    pub minimum_calls: usize,
    /// Failure rate (0.0 to 1.0) that must be exceeded to open.
    pub failure_threshold: f64,
    /// Time spent OPEN before trial requests are let through, in milliseconds.
    pub cool_down_ms: u64,
    /// Trial requests allowed in HALF_OPEN.
    pub half_open_trials: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_size: 10,
            minimum_calls: 10,
            failure_threshold: 0.5,
            cool_down_ms: 30_000,
            half_open_trials: 3,
        }
    }
}

impl BreakerSettings {
    #[must_use]
    pub fn cool_down(&self) -> Duration {
        Duration::from_millis(self.cool_down_ms)
    }

    /// Builder: cool-down before HALF_OPEN.
    #[must_use]
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down_ms = u64::try_from(cool_down.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder: trial requests in HALF_OPEN.
    #[must_use]
    pub fn with_half_open_trials(mut self, trials: u32) -> Self {
        self.half_open_trials = trials.max(1);
        self
    }

    /// Builder: rolling window shape.
    #[must_use]
    pub fn with_window(mut self, window_size: usize, minimum_calls: usize, failure_threshold: f64) -> Self {
        self.window_size = window_size.max(1);
        self.minimum_calls = minimum_calls.clamp(1, self.window_size);
        self.failure_threshold = failure_threshold;
        self
    }
}

/// The three breaker phases, without their bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    /// Counter label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

/// Breaker state with the data each phase needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Outcomes of recent calls, `true` for failure, newest last.
    Closed { window: VecDeque<bool> },
    /// Short-circuiting until `until`.
    Open { until: Instant },
    /// `issued` trial permits handed out, `succeeded` of them reported back.
    HalfOpen { issued: u32, succeeded: u32 },
}

impl CircuitState {
    fn closed() -> Self {
        CircuitState::Closed { window: VecDeque::new() }
    }

    #[must_use]
    pub fn phase(&self) -> CircuitPhase {
        match self {
            CircuitState::Closed { .. } => CircuitPhase::Closed,
            CircuitState::Open { .. } => CircuitPhase::Open,
            CircuitState::HalfOpen { .. } => CircuitPhase::HalfOpen,
        }
    }
}

/// Result of one backend call, from the breaker's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Permission to make one call; report its outcome with [`CircuitBreaker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Permit {
    generation: u64,
}

/// A phase change, reported so callers can log and count it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitPhase,
    pub to: CircuitPhase,
}

/// Refusal while OPEN, or while HALF_OPEN has no trial permits left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Time until trial requests may pass; zero while HALF_OPEN.
    pub retry_in: Duration,
}

/// A single breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: CircuitState,
    generation: u64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self { settings, state: CircuitState::closed(), generation: 0 }
    }

    #[must_use]
    pub fn state(&self) -> &CircuitState {
        &self.state
    }

    /// Ask to make a call at `now`.
    ///
    /// An elapsed cool-down moves OPEN to HALF_OPEN and the caller receives
    /// the first trial permit.
    ///
    /// # Errors
    /// Returns [`CircuitOpen`] while the circuit short-circuits.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(Permit, Option<Transition>), CircuitOpen> {
        match &mut self.state {
            CircuitState::Closed { .. } => Ok((self.permit(), None)),
            CircuitState::Open { until } => {
                if now < *until {
                    return Err(CircuitOpen { retry_in: *until - now });
                }
                let transition = self.transition(CircuitState::HalfOpen { issued: 1, succeeded: 0 });
                Ok((self.permit(), Some(transition)))
            }
            CircuitState::HalfOpen { issued, .. } => {
                if *issued >= self.settings.half_open_trials {
                    return Err(CircuitOpen { retry_in: Duration::ZERO });
                }
                *issued += 1;
                Ok((self.permit(), None))
            }
        }
    }

    /// Report the outcome of a permitted call.
    pub fn record(&mut self, permit: Permit, outcome: Outcome, now: Instant) -> Option<Transition> {
        if permit.generation != self.generation {
            return None;
        }
        let cool_down = self.settings.cool_down();
        let trials = self.settings.half_open_trials;
        let next = match &mut self.state {
            CircuitState::Closed { window } => {
                window.push_back(outcome == Outcome::Failure);
                while window.len() > self.settings.window_size {
                    window.pop_front();
                }
                if window.len() < self.settings.minimum_calls {
                    return None;
                }
                let failures = window.iter().filter(|failed| **failed).count();
                #[expect(clippy::cast_precision_loss, reason = "window sizes are small")]
                let rate = failures as f64 / window.len() as f64;
                (rate > self.settings.failure_threshold).then(|| CircuitState::Open { until: now + cool_down })
            }
            CircuitState::HalfOpen { succeeded, .. } => match outcome {
                Outcome::Success => {
                    *succeeded += 1;
                    (*succeeded >= trials).then(CircuitState::closed)
                }
                Outcome::Failure => Some(CircuitState::Open { until: now + cool_down }),
            },
            CircuitState::Open { .. } => None,
        };
        next.map(|state| self.transition(state))
    }

    fn permit(&self) -> Permit {
        Permit { generation: self.generation }
    }

    fn transition(&mut self, next: CircuitState) -> Transition {
        let from = self.state.phase();
        let to = next.phase();
        self.state = next;
        self.generation += 1;
        Transition { from, to }
    }
}

/// One breaker per name, each behind its own lock.
pub struct BreakerTable {
    settings: BreakerSettings,
    breakers: DashMap<String, Arc<Mutex<CircuitBreaker>>>,
    metrics: GatewayMetrics,
}

impl BreakerTable {
    #[must_use]
    pub fn new(settings: BreakerSettings, metrics: GatewayMetrics) -> Self {
        Self { settings, breakers: DashMap::new(), metrics }
    }

    fn breaker(&self, name: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        let created = self
            .breakers
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitBreaker::new(self.settings.clone()))));
        Arc::clone(created.value())
    }

    /// Acquire a permit from breaker `name`.
    ///
    /// # Errors
    /// Returns [`CircuitOpen`] while that breaker short-circuits.
    pub fn acquire(&self, name: &str) -> Result<Permit, CircuitOpen> {
        let breaker = self.breaker(name);
        let (permit, transition) = breaker.lock().try_acquire(Instant::now())?;
        if let Some(t) = transition {
            self.observe(name, t);
        }
        Ok(permit)
    }

    /// Report the outcome of a call made under `permit`.
    pub fn record(&self, name: &str, permit: Permit, outcome: Outcome) {
        let breaker = self.breaker(name);
        let transition = breaker.lock().record(permit, outcome, Instant::now());
        if let Some(t) = transition {
            self.observe(name, t);
        }
    }

    /// Current phase of breaker `name`; unknown breakers are closed.
    #[must_use]
    pub fn phase(&self, name: &str) -> CircuitPhase {
        self.breakers
            .get(name)
            .map_or(CircuitPhase::Closed, |b| b.lock().state().phase())
    }

    fn observe(&self, name: &str, t: Transition) {
        match t.to {
            CircuitPhase::Open => tracing::warn!(
                breaker = name,
                from = t.from.as_str(),
                to = t.to.as_str(),
                "circuit opened"
            ),
            _ => tracing::info!(
                breaker = name,
                from = t.from.as_str(),
                to = t.to.as_str(),
                "circuit transition"
            ),
        }
        self.metrics.record_transition(name, t.to.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BreakerSettings {
        BreakerSettings::default()
            .with_window(10, 10, 0.5)
            .with_cool_down(Duration::from_secs(30))
            .with_half_open_trials(3)
    }

    fn acquire(b: &mut CircuitBreaker) -> Permit {
        match b.try_acquire(Instant::now()) {
            Ok((permit, _)) => permit,
            Err(e) => panic!("expected permit, got {e:?}"),
        }
    }

    fn run(b: &mut CircuitBreaker, outcome: Outcome) -> Option<Transition> {
        let permit = acquire(b);
        b.record(permit, outcome, Instant::now())
    }

    fn trip(b: &mut CircuitBreaker) {
        for _ in 0..10 {
            run(b, Outcome::Failure);
        }
        assert_eq!(b.state().phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_only_when_rate_exceeds_threshold() {
        let mut b = CircuitBreaker::new(settings());
        for i in 0..10 {
            let outcome = if i % 2 == 0 { Outcome::Success } else { Outcome::Failure };
            assert_eq!(run(&mut b, outcome), None, "exactly 50% must not open");
        }
        let t = run(&mut b, Outcome::Failure);
        assert_eq!(t, Some(Transition { from: CircuitPhase::Closed, to: CircuitPhase::Open }));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_minimum_calls() {
        let mut b = CircuitBreaker::new(settings());
        for _ in 0..9 {
            assert_eq!(run(&mut b, Outcome::Failure), None);
        }
        assert!(run(&mut b, Outcome::Failure).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejects_until_cool_down() {
        let mut b = CircuitBreaker::new(settings());
        trip(&mut b);
        match b.try_acquire(Instant::now()) {
            Err(CircuitOpen { retry_in }) => assert_eq!(retry_in, Duration::from_secs(30)),
            Ok(_) => panic!("open circuit must reject"),
        }
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(b.try_acquire(Instant::now()).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_the_trial_count() {
        let mut b = CircuitBreaker::new(settings());
        trip(&mut b);
        for _ in 0..50 {
            assert!(b.try_acquire(Instant::now()).is_err(), "requests during OPEN do not consume trials");
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let mut granted = 0;
        for _ in 0..20 {
            if b.try_acquire(Instant::now()).is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 3);
        assert_eq!(b.state().phase(), CircuitPhase::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trials_close_with_fresh_window() {
        let mut b = CircuitBreaker::new(settings());
        trip(&mut b);
        tokio::time::advance(Duration::from_secs(30)).await;

        let permits: Vec<Permit> = (0..3).map(|_| acquire(&mut b)).collect();
        let mut last = None;
        for p in permits {
            last = b.record(p, Outcome::Success, Instant::now());
        }
        assert_eq!(last, Some(Transition { from: CircuitPhase::HalfOpen, to: CircuitPhase::Closed }));
        assert_eq!(b.state(), &CircuitState::Closed { window: VecDeque::new() });
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_restarts_cool_down() {
        let mut b = CircuitBreaker::new(settings());
        trip(&mut b);
        tokio::time::advance(Duration::from_secs(30)).await;

        let first = acquire(&mut b);
        let second = acquire(&mut b);
        let t = b.record(first, Outcome::Failure, Instant::now());
        assert_eq!(t, Some(Transition { from: CircuitPhase::HalfOpen, to: CircuitPhase::Open }));
        assert_eq!(b.record(second, Outcome::Success, Instant::now()), None, "stale permit is ignored");

        match b.try_acquire(Instant::now()) {
            Err(CircuitOpen { retry_in }) => assert_eq!(retry_in, Duration::from_secs(30)),
            Ok(_) => panic!("reopened circuit must reject"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn table_keeps_breakers_independent_and_counts_transitions() {
        let metrics = match GatewayMetrics::new() {
            Ok(m) => m,
            Err(e) => panic!("metrics: {e}"),
        };
        let table = BreakerTable::new(settings(), metrics.clone());
        for _ in 0..10 {
            match table.acquire("orders") {
                Ok(p) => table.record("orders", p, Outcome::Failure),
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
        assert_eq!(table.phase("orders"), CircuitPhase::Open);
        assert_eq!(table.phase("catalog"), CircuitPhase::Closed);
        assert!(table.acquire("orders").is_err());
        assert!(table.acquire("catalog").is_ok());
        assert_eq!(metrics.transition_count("orders", "open"), 1);
    }
}
