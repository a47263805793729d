//! Fixed-window distributed rate limiter for the Bastion gateway.
//!
//! Counters live in a shared [`QuotaStore`] keyed by a hashed caller
//! identity and the matched route prefix. [`RedisQuotaStore`] shares
//! counters across gateway instances; [`MemoryQuotaStore`] serves
//! single-instance deployments and tests.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod client;
pub mod error;
pub mod limiter;
pub mod policy;
pub mod redis_store;
pub mod store;

pub use client::{client_address, first_forwarded_hop, ClientKey};
pub use error::StoreError;
pub use limiter::{QuotaSnapshot, RateDecision, RateLimiter};
pub use policy::QuotaPolicy;
pub use redis_store::RedisQuotaStore;
pub use store::{MemoryQuotaStore, QuotaStore, WindowCount};
