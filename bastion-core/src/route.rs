use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::Role;

/// Payment-class routes never retry more than this many times.
pub const PAYMENT_RETRY_CAP: u32 = 1;

/// Retry handling class of a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RouteClass {
    /// Ordinary route; retry budget applies as configured.
    #[default]
    Standard,
    /// Financial side effects; retries are capped at [`PAYMENT_RETRY_CAP`].
    Payment,
}

/// Static mapping from a path prefix to a logical backend.
///
/// Loaded once at startup and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RouteDescriptor {
    /// Path prefix, matched on segment boundaries (e.g. `"/api/orders"`).
    pub prefix: String,
    /// Logical backend name resolved through service discovery.
    pub backend: String,
    /// Roles of which the caller must hold at least one. Empty means open.
    #[serde(default)]
    pub required_roles: Vec<Role>,
    /// Maximum automatic retries for safe or idempotent requests.
    #[serde(default)]
    pub retry_budget: u32,
    /// Marks mutating methods on this route as safe to retry.
    #[serde(default)]
    pub idempotent: bool,
    /// Retry handling class.
    #[serde(default)]
    pub class: RouteClass,
    /// Circuit breaker name; defaults to the backend name.
    #[serde(default)]
    pub circuit_breaker: Option<String>,
    /// Per-window request ceiling for this path, regardless of caller role.
    #[serde(default)]
    pub rate_ceiling: Option<u64>,
    /// Per-attempt upstream timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Message returned while the circuit for this route is open.
    #[serde(default)]
    pub fallback_message: Option<String>,
}

impl RouteDescriptor {
    /// Minimal descriptor: `prefix` routed to `backend`, no roles, no retries.
    pub fn new(prefix: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            backend: backend.into(),
            required_roles: Vec::new(),
            retry_budget: 0,
            idempotent: false,
            class: RouteClass::Standard,
            circuit_breaker: None,
            rate_ceiling: None,
            timeout_ms: None,
            fallback_message: None,
        }
    }

    /// Builder: require at least one of `roles`.
    #[must_use]
    pub fn with_roles<I, R>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Role>,
    {
        self.required_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: set the retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Builder: set the route class.
    #[must_use]
    pub fn with_class(mut self, class: RouteClass) -> Self {
        self.class = class;
        self
    }

    /// Builder: mark mutating methods as retry-safe.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Builder: cap requests per window on this path.
    #[must_use]
    pub fn with_rate_ceiling(mut self, ceiling: u64) -> Self {
        self.rate_ceiling = Some(ceiling);
        self
    }

    /// Builder: share a breaker under a custom name.
    #[must_use]
    pub fn with_circuit_breaker(mut self, name: impl Into<String>) -> Self {
        self.circuit_breaker = Some(name.into());
        self
    }

    /// Builder: per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// `true` if `path` falls under this descriptor's prefix.
    ///
    /// `/api/orders` matches `/api/orders` and `/api/orders/7`, not `/api/ordersx`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let Some(rest) = path.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        rest.is_empty() || self.prefix.ends_with('/') || rest.starts_with('/')
    }

    /// `true` if the route names no required role.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.required_roles.is_empty()
    }

    /// Name of the circuit breaker guarding this route.
    #[must_use]
    pub fn breaker_name(&self) -> &str {
        self.circuit_breaker.as_deref().unwrap_or(&self.backend)
    }

    /// Per-attempt timeout, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Fallback message while the circuit is open.
    #[must_use]
    pub fn fallback_message(&self) -> String {
        self.fallback_message.clone().unwrap_or_else(|| {
            format!("{} is temporarily unavailable, please retry later", self.backend)
        })
    }

    /// Number of automatic retries allowed for a request with `method`.
    ///
    /// Safe methods use the full budget, mutating methods get none unless the
    /// route is idempotent, and payment routes are capped at one.
    #[must_use]
    pub fn retries_for(&self, method: &str) -> u32 {
        let budget = if is_safe_method(method) || self.idempotent {
            self.retry_budget
        } else {
            0
        };
        match self.class {
            RouteClass::Payment => budget.min(PAYMENT_RETRY_CAP),
            RouteClass::Standard => budget,
        }
    }
}

/// `true` for methods with no side effects by definition.
#[must_use]
pub fn is_safe_method(method: &str) -> bool {
    matches!(method.to_ascii_uppercase().as_str(), "GET" | "HEAD" | "OPTIONS")
}

/// The set of route descriptors, queried by longest-prefix match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RouteDescriptor>", into = "Vec<RouteDescriptor>")]
pub struct RouteTable {
    /// Sorted longest prefix first so the first match wins.
    routes: Vec<RouteDescriptor>,
}

impl RouteTable {
    /// Validate and index a list of descriptors.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidRoute`] if a prefix is empty or relative, or
    /// [`CoreError::DuplicateRoute`] if two descriptors share a prefix.
    pub fn new(mut routes: Vec<RouteDescriptor>) -> Result<Self, CoreError> {
        for route in &routes {
            if !route.prefix.starts_with('/') {
                return Err(CoreError::InvalidRoute {
                    prefix: route.prefix.clone(),
                    reason: "prefix must start with '/'".to_owned(),
                });
            }
            if route.backend.trim().is_empty() {
                return Err(CoreError::InvalidRoute {
                    prefix: route.prefix.clone(),
                    reason: "backend name must not be empty".to_owned(),
                });
            }
        }
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then_with(|| a.prefix.cmp(&b.prefix)));
        if let Some(dup) = routes.windows(2).find(|w| w[0].prefix == w[1].prefix) {
            return Err(CoreError::DuplicateRoute { prefix: dup[0].prefix.clone() });
        }
        Ok(Self { routes })
    }

    /// The most specific descriptor covering `path`, if any.
    #[must_use]
    pub fn longest_match(&self, path: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.matches(path))
    }

    /// Iterate descriptors, longest prefix first.
    pub fn iter(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter()
    }

    /// Check every descriptor names a backend for which `known` holds.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownBackend`] for the first offending route.
    pub fn check_backends(&self, known: impl Fn(&str) -> bool) -> Result<(), CoreError> {
        match self.routes.iter().find(|r| !known(&r.backend)) {
            Some(route) => Err(CoreError::UnknownBackend {
                prefix: route.prefix.clone(),
                backend: route.backend.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// `true` if the table has no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl TryFrom<Vec<RouteDescriptor>> for RouteTable {
    type Error = CoreError;

    fn try_from(routes: Vec<RouteDescriptor>) -> Result<Self, Self::Error> {
        Self::new(routes)
    }
}

impl From<RouteTable> for Vec<RouteDescriptor> {
    fn from(table: RouteTable) -> Self {
        table.routes
    }
}
