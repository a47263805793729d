//! Error types for the auth crate.

/// Reasons a bearer credential is refused.
///
/// None of these are retried: the caller must present a different credential.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No `Authorization` header, or not of the form `Bearer <token>`.
    #[error("missing bearer credential")]
    MissingCredential,

    /// The token could not be decoded or lacks a required claim.
    #[error("malformed credential: {0}")]
    Malformed(String),

    /// No trusted key verifies the token signature.
    #[error("credential signature is not trusted")]
    BadSignature,

    /// The `iss` claim does not match the configured issuer.
    #[error("credential issuer is not trusted")]
    InvalidIssuer,

    /// The `aud` claim does not name the configured audience.
    #[error("credential audience is not accepted")]
    InvalidAudience,

    /// The `exp` claim is in the past.
    #[error("credential has expired")]
    Expired,

    /// The token identifier was revoked before its natural expiry.
    #[error("credential has been revoked")]
    Revoked,

    /// Trust material could not be loaded or parsed.
    #[error("trust material unavailable: {0}")]
    TrustMaterial(String),
}

impl AuthError {
    /// Stable label used for the outcome counter and in log fields.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::MissingCredential => "missing",
            AuthError::Malformed(_) => "malformed",
            AuthError::BadSignature => "bad_signature",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::Expired => "expired",
            AuthError::Revoked => "revoked",
            AuthError::TrustMaterial(_) => "trust_material",
        }
    }
}
