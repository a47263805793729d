//! Routing and failure isolation for the Bastion gateway.
//!
//! [`RoutingEngine`] forwards admitted requests to the backend named by the
//! matched route, retrying within the route's budget and short-circuiting
//! through a per-backend [`CircuitBreaker`] when a backend keeps failing.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod circuit;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod upstream;

pub use circuit::{
    BreakerSettings, BreakerTable, CircuitBreaker, CircuitOpen, CircuitPhase, CircuitState, Outcome, Permit,
    Transition,
};
pub use discovery::{Endpoint, ServiceDiscovery, StaticDiscovery};
pub use engine::{ForwardContext, RoutingEngine, DEFAULT_UPSTREAM_TIMEOUT, REQUEST_ID_HEADER, USER_ID_HEADER};
pub use error::{RoutingError, UpstreamError};
pub use upstream::{HyperUpstream, Upstream, UpstreamRequest, UpstreamResponse};
