//! Claims resolver: turns an `Authorization` header into verified claims.
//!
//! Every lookup, cached or not, consults the revocation list before the
//! claims are handed out, so a revoke takes effect on the very next request.

use std::sync::Arc;
use std::time::Duration;

use bastion_core::{GatewayMetrics, Role, Subject, TokenId, VerifiedClaims};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::cache::ClaimsCache;
use crate::error::AuthError;
use crate::revocation::RevocationList;
use crate::trust::{TokenClaims, TrustProvider, Verifier};

/// Default upper bound on how long verified claims stay cached.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Default maximum number of cached credentials.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Cache sizing for a [`ClaimsResolver`].
#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self { cache_ttl: DEFAULT_CACHE_TTL, cache_capacity: DEFAULT_CACHE_CAPACITY }
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme is matched case-insensitively.
///
/// # Errors
/// Returns [`AuthError::MissingCredential`] if the header is absent, uses a
/// different scheme, or carries an empty token, and [`AuthError::Malformed`]
/// if the token contains whitespace.
pub fn parse_bearer(raw_header: Option<&str>) -> Result<&str, AuthError> {
    let raw = raw_header.ok_or(AuthError::MissingCredential)?;
    let (scheme, token) = raw.trim().split_once(' ').ok_or(AuthError::MissingCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredential);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredential);
    }
    if token.contains(char::is_whitespace) {
        return Err(AuthError::Malformed("token contains whitespace".to_owned()));
    }
    Ok(token)
}

/// Validates bearer credentials against trust material, with caching and
/// revocation.
pub struct ClaimsResolver {
    provider: Arc<dyn TrustProvider>,
    verifier: RwLock<Verifier>,
    cache: ClaimsCache,
    revocations: Arc<RevocationList>,
    metrics: GatewayMetrics,
}

impl ClaimsResolver {
    /// Fetch trust material from `provider` and build a resolver.
    ///
    /// # Errors
    /// Returns [`AuthError::TrustMaterial`] if the material cannot be fetched
    /// or compiled.
    pub async fn new(
        provider: Arc<dyn TrustProvider>,
        settings: ResolverSettings,
        revocations: Arc<RevocationList>,
        metrics: GatewayMetrics,
    ) -> Result<Self, AuthError> {
        let material = provider.fetch().await?;
        let verifier = Verifier::compile(&material)?;
        tracing::info!(
            issuer = %material.issuer,
            keys = material.keys.len(),
            cache_ttl_secs = settings.cache_ttl.as_secs(),
            "claims resolver ready"
        );
        Ok(Self {
            provider,
            verifier: RwLock::new(verifier),
            cache: ClaimsCache::new(settings.cache_capacity, settings.cache_ttl),
            revocations,
            metrics,
        })
    }

    /// Re-fetch trust material (e.g. after key rotation).
    ///
    /// Cached claims stay valid; they were verified against keys that were
    /// trusted at the time and expire within the cache TTL.
    ///
    /// # Errors
    /// Returns [`AuthError::TrustMaterial`] and keeps the previous keys if
    /// the new material is unusable.
    pub async fn reload(&self) -> Result<(), AuthError> {
        let material = self.provider.fetch().await?;
        let verifier = Verifier::compile(&material)?;
        *self.verifier.write() = verifier;
        tracing::info!(issuer = %material.issuer, keys = material.keys.len(), "trust material reloaded");
        Ok(())
    }

    /// Resolve the raw `Authorization` header value into verified claims.
    ///
    /// # Errors
    /// Returns the [`AuthError`] describing why the credential was refused.
    pub fn resolve(&self, raw_header: Option<&str>) -> Result<VerifiedClaims, AuthError> {
        let outcome = self.resolve_inner(raw_header);
        match &outcome {
            Ok((_, cached)) => self.metrics.record_auth(if *cached { "cached" } else { "success" }),
            Err(e) => {
                self.metrics.record_auth(e.outcome());
                tracing::debug!(outcome = e.outcome(), "credential refused");
            }
        }
        outcome.map(|(claims, _)| claims)
    }

    fn resolve_inner(&self, raw_header: Option<&str>) -> Result<(VerifiedClaims, bool), AuthError> {
        let token = parse_bearer(raw_header)?;
        let now = Utc::now();

        if let Some(claims) = self.cache.get(token) {
            if self.revocations.is_revoked(&claims.token_id) {
                self.cache.remove(token);
                return Err(AuthError::Revoked);
            }
            if !claims.is_expired_at(now) {
                return Ok((claims, true));
            }
            self.cache.remove(token);
        }

        let wire = self.verifier.read().verify(token)?;
        let claims = into_verified(wire)?;
        if self.revocations.is_revoked(&claims.token_id) {
            return Err(AuthError::Revoked);
        }

        let remaining = (claims.expires_at - now).to_std().unwrap_or(Duration::ZERO);
        self.cache.insert(token, claims.clone(), remaining);
        Ok((claims, false))
    }

    /// Revoke already-verified claims (logout).
    pub fn revoke(&self, claims: &VerifiedClaims) {
        self.revocations.revoke(claims.token_id.clone(), claims.expires_at);
    }

    /// Verify the credential in `raw_header`, revoke it and drop it from the cache.
    ///
    /// # Errors
    /// Returns the [`AuthError`] if the credential does not verify; an already
    /// revoked credential yields [`AuthError::Revoked`].
    pub fn revoke_header(&self, raw_header: Option<&str>) -> Result<VerifiedClaims, AuthError> {
        let claims = self.resolve(raw_header)?;
        self.revoke(&claims);
        if let Ok(token) = parse_bearer(raw_header) {
            self.cache.remove(token);
        }
        Ok(claims)
    }

    /// Purge expired revocations and aged-out cache entries.
    ///
    /// Returns `(revocations_purged, cache_entries_purged)`.
    pub fn sweep(&self) -> (usize, usize) {
        let revoked = self.revocations.purge_expired(Utc::now());
        let cached = self.cache.purge_expired();
        if revoked > 0 || cached > 0 {
            tracing::debug!(revoked, cached, "auth sweep");
        }
        (revoked, cached)
    }

    /// The revocation list shared with this resolver.
    #[must_use]
    pub fn revocations(&self) -> &Arc<RevocationList> {
        &self.revocations
    }

    /// Number of credentials currently cached.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

fn into_verified(wire: TokenClaims) -> Result<VerifiedClaims, AuthError> {
    let issued_at = timestamp(wire.iat, "iat")?;
    let expires_at = timestamp(wire.exp, "exp")?;
    if wire.jti.trim().is_empty() {
        return Err(AuthError::Malformed("empty 'jti' claim".to_owned()));
    }
    Ok(VerifiedClaims::new(
        Subject::new(wire.sub),
        wire.iss,
        issued_at,
        expires_at,
        wire.roles.into_iter().map(Role::new).collect(),
        TokenId::new(wire.jti),
    ))
}

fn timestamp(secs: i64, claim: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AuthError::Malformed(format!("'{claim}' claim out of range")))
}
