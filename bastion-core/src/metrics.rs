//! Counters and timers for every pipeline decision.
//!
//! The registry is owned by [`GatewayMetrics`] and injected into each stage,
//! so tests can build an isolated instance and read counters back.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::error::CoreError;

/// Metric handles shared by all pipeline stages. Cheap to clone.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    auth_outcomes: IntCounterVec,
    authz_decisions: IntCounterVec,
    ratelimit_decisions: IntCounterVec,
    route_requests: IntCounterVec,
    upstream_retries: IntCounterVec,
    circuit_transitions: IntCounterVec,
    upstream_duration: HistogramVec,
}

impl GatewayMetrics {
    /// Build and register every metric in a fresh registry.
    ///
    /// # Errors
    /// Returns [`CoreError::Metrics`] if a metric definition is rejected.
    pub fn new() -> Result<Self, CoreError> {
        let registry = Registry::new();

        let auth_outcomes = IntCounterVec::new(
            Opts::new("bastion_auth_outcomes_total", "Credential validation outcomes"),
            &["outcome"],
        )?;
        let authz_decisions = IntCounterVec::new(
            Opts::new("bastion_authz_decisions_total", "Authorization decisions"),
            &["decision"],
        )?;
        let ratelimit_decisions = IntCounterVec::new(
            Opts::new("bastion_ratelimit_decisions_total", "Rate limiter decisions"),
            &["decision"],
        )?;
        let route_requests = IntCounterVec::new(
            Opts::new("bastion_route_requests_total", "Requests routed per backend"),
            &["backend"],
        )?;
        let upstream_retries = IntCounterVec::new(
            Opts::new("bastion_upstream_retries_total", "Retry attempts per backend"),
            &["backend"],
        )?;
        let circuit_transitions = IntCounterVec::new(
            Opts::new("bastion_circuit_transitions_total", "Circuit breaker state changes"),
            &["breaker", "to"],
        )?;
        let upstream_duration = HistogramVec::new(
            HistogramOpts::new("bastion_upstream_duration_seconds", "Upstream call latency"),
            &["backend"],
        )?;

        registry.register(Box::new(auth_outcomes.clone()))?;
        registry.register(Box::new(authz_decisions.clone()))?;
        registry.register(Box::new(ratelimit_decisions.clone()))?;
        registry.register(Box::new(route_requests.clone()))?;
        registry.register(Box::new(upstream_retries.clone()))?;
        registry.register(Box::new(circuit_transitions.clone()))?;
        registry.register(Box::new(upstream_duration.clone()))?;

        Ok(Self {
            registry,
            auth_outcomes,
            authz_decisions,
            ratelimit_decisions,
            route_requests,
            upstream_retries,
            circuit_transitions,
            upstream_duration,
        })
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_auth(&self, outcome: &str) {
        self.auth_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_authz(&self, decision: &str) {
        self.authz_decisions.with_label_values(&[decision]).inc();
    }

    pub fn record_ratelimit(&self, decision: &str) {
        self.ratelimit_decisions.with_label_values(&[decision]).inc();
    }

    pub fn record_route(&self, backend: &str) {
        self.route_requests.with_label_values(&[backend]).inc();
    }

    pub fn record_retry(&self, backend: &str) {
        self.upstream_retries.with_label_values(&[backend]).inc();
    }

    pub fn record_transition(&self, breaker: &str, to: &str) {
        self.circuit_transitions.with_label_values(&[breaker, to]).inc();
    }

    pub fn observe_upstream(&self, backend: &str, seconds: f64) {
        self.upstream_duration.with_label_values(&[backend]).observe(seconds);
    }

    /// Current value of `bastion_auth_outcomes_total{outcome}`.
    #[must_use]
    pub fn auth_count(&self, outcome: &str) -> u64 {
        self.auth_outcomes.with_label_values(&[outcome]).get()
    }

    /// Current value of `bastion_authz_decisions_total{decision}`.
    #[must_use]
    pub fn authz_count(&self, decision: &str) -> u64 {
        self.authz_decisions.with_label_values(&[decision]).get()
    }

    /// Current value of `bastion_route_requests_total{backend}`.
    #[must_use]
    pub fn route_count(&self, backend: &str) -> u64 {
        self.route_requests.with_label_values(&[backend]).get()
    }

    /// Current value of `bastion_ratelimit_decisions_total{decision}`.
    #[must_use]
    pub fn ratelimit_count(&self, decision: &str) -> u64 {
        self.ratelimit_decisions.with_label_values(&[decision]).get()
    }

    /// Current value of `bastion_upstream_retries_total{backend}`.
    #[must_use]
    pub fn retry_count(&self, backend: &str) -> u64 {
        self.upstream_retries.with_label_values(&[backend]).get()
    }

    /// Current value of `bastion_circuit_transitions_total{breaker,to}`.
    #[must_use]
    pub fn transition_count(&self, breaker: &str, to: &str) -> u64 {
        self.circuit_transitions.with_label_values(&[breaker, to]).get()
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}
