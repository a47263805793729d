//! Credential resolution and authorization policy for the Bastion gateway.
//!
//! The [`ClaimsResolver`] validates bearer credentials against trust
//! material, caches verified claims and enforces revocation; [`authorize`]
//! decides allow/deny from the route table.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod error;
pub mod policy;
pub mod public;
pub mod resolver;
pub mod revocation;
pub mod trust;

pub use cache::ClaimsCache;
pub use error::AuthError;
pub use policy::{authorize, Decision, DenyReason};
pub use public::{PathPattern, PublicPaths};
pub use resolver::{parse_bearer, ClaimsResolver, ResolverSettings};
pub use revocation::RevocationList;
pub use trust::{KeyMaterial, StaticTrustProvider, TokenClaims, TrustMaterial, TrustProvider, TrustedKey};
