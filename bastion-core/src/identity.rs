use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{Subject, TokenId};

/// A named authority carried by a credential (e.g. `"admin"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Creates a `Role` from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The decoded, signature-validated contents of a bearer credential.
///
/// Only the claims resolver constructs these, and only for credentials whose
/// signature, issuer and expiry all checked out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VerifiedClaims {
    /// Who the credential was issued to.
    pub subject: Subject,
    /// Who issued the credential.
    pub issuer: String,
    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,
    /// When the credential stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Authorities granted to the subject.
    pub roles: Vec<Role>,
    /// Unique identifier of this credential, used for revocation.
    pub token_id: TokenId,
}

impl VerifiedClaims {
    /// Assemble claims from already-validated parts.
    #[must_use]
    pub fn new(
        subject: Subject,
        issuer: String,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        roles: Vec<Role>,
        token_id: TokenId,
    ) -> Self {
        Self { subject, issuer, issued_at, expires_at, roles, token_id }
    }

    /// `true` if the subject holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// `true` once `now` is at or past the expiry instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The caller of a request as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A caller whose bearer credential was verified.
    Authenticated(VerifiedClaims),
    /// A caller on a public path; no credential was inspected.
    Anonymous,
}

impl Identity {
    /// Roles held by the caller. Anonymous callers hold none.
    #[must_use]
    pub fn roles(&self) -> &[Role] {
        match self {
            Identity::Authenticated(claims) => &claims.roles,
            Identity::Anonymous => &[],
        }
    }

    /// The verified claims, if any.
    #[must_use]
    pub fn claims(&self) -> Option<&VerifiedClaims> {
        match self {
            Identity::Authenticated(claims) => Some(claims),
            Identity::Anonymous => None,
        }
    }

    /// The authenticated subject, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&Subject> {
        self.claims().map(|c| &c.subject)
    }
}
