//! Trust material: the keys and issuer a credential must match.
//!
//! A [`TrustProvider`] is consulted when the resolver is built and on
//! explicit reload, never per request. The resolver compiles the material
//! into [`Verifier`] once so the hot path only does signature checks.

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Raw key bytes for one trusted signer.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[non_exhaustive]
pub enum KeyMaterial {
    /// Shared secret for `HS256`/`HS384`/`HS512`.
    Hmac(Vec<u8>),
    /// PEM-encoded RSA public key for `RS*`/`PS*`.
    RsaPem(String),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMaterial::Hmac(_) => f.write_str("Hmac(..)"),
            KeyMaterial::RsaPem(_) => f.write_str("RsaPem(..)"),
        }
    }
}

/// A key the gateway accepts signatures from, optionally addressed by `kid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TrustedKey {
    /// Key id matched against the token header's `kid`.
    pub kid: Option<String>,
    /// The key itself.
    pub material: KeyMaterial,
}

impl TrustedKey {
    /// An HMAC key with no `kid`.
    pub fn hmac(secret: impl Into<Vec<u8>>) -> Self {
        Self { kid: None, material: KeyMaterial::Hmac(secret.into()) }
    }

    /// An RSA public key with no `kid`.
    pub fn rsa_pem(pem: impl Into<String>) -> Self {
        Self { kid: None, material: KeyMaterial::RsaPem(pem.into()) }
    }

    /// Builder: address this key by `kid`.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }
}

/// Everything needed to validate a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TrustMaterial {
    /// Required value of the `iss` claim.
    pub issuer: String,
    /// Accepted signing keys, tried in order.
    pub keys: Vec<TrustedKey>,
    /// Clock skew tolerated on `exp`, in seconds.
    #[serde(default)]
    pub leeway_secs: u64,
    /// Required `aud` value. When unset the `aud` claim is not checked.
    #[serde(default)]
    pub audience: Option<String>,
}

impl TrustMaterial {
    /// Material for `issuer` with the given keys and no leeway.
    pub fn new(issuer: impl Into<String>, keys: Vec<TrustedKey>) -> Self {
        Self { issuer: issuer.into(), keys, leeway_secs: 0, audience: None }
    }

    /// Builder: tolerate `secs` of clock skew.
    #[must_use]
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Builder: only accept tokens whose `aud` includes `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }
}

/// Source of trust material (static config, key-set endpoint, vault...).
#[async_trait]
pub trait TrustProvider: Send + Sync {
    /// Fetch the current trust material.
    ///
    /// # Errors
    /// Returns [`AuthError::TrustMaterial`] if the material cannot be obtained.
    async fn fetch(&self) -> Result<TrustMaterial, AuthError>;
}

/// Trust material fixed at construction, typically from configuration.
#[derive(Debug, Clone)]
pub struct StaticTrustProvider {
    material: TrustMaterial,
}

impl StaticTrustProvider {
    #[must_use]
    pub fn new(material: TrustMaterial) -> Self {
        Self { material }
    }
}

#[async_trait]
impl TrustProvider for StaticTrustProvider {
    async fn fetch(&self) -> Result<TrustMaterial, AuthError> {
        Ok(self.material.clone())
    }
}

/// Claims as they appear on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, alias = "authorities")]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Hmac,
    Rsa,
}

impl KeyFamily {
    fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Some(Self::Hmac),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            _ => None,
        }
    }
}

struct CompiledKey {
    kid: Option<String>,
    family: KeyFamily,
    key: DecodingKey,
}

/// Trust material compiled into decoding keys.
pub(crate) struct Verifier {
    issuer: String,
    leeway_secs: u64,
    audience: Option<String>,
    keys: Vec<CompiledKey>,
}

impl Verifier {
    /// Parse every key in `material`.
    ///
    /// # Errors
    /// Returns [`AuthError::TrustMaterial`] if there are no keys or a PEM is invalid.
    pub(crate) fn compile(material: &TrustMaterial) -> Result<Self, AuthError> {
        if material.keys.is_empty() {
            return Err(AuthError::TrustMaterial("no trusted keys configured".to_owned()));
        }
        let keys = material
            .keys
            .iter()
            .map(|k| {
                let (family, key) = match &k.material {
                    KeyMaterial::Hmac(secret) => (KeyFamily::Hmac, DecodingKey::from_secret(secret)),
                    KeyMaterial::RsaPem(pem) => (
                        KeyFamily::Rsa,
                        DecodingKey::from_rsa_pem(pem.as_bytes())
                            .map_err(|e| AuthError::TrustMaterial(format!("invalid RSA key: {e}")))?,
                    ),
                };
                Ok(CompiledKey { kid: k.kid.clone(), family, key })
            })
            .collect::<Result<Vec<_>, AuthError>>()?;
        Ok(Self {
            issuer: material.issuer.clone(),
            leeway_secs: material.leeway_secs,
            audience: material.audience.clone(),
            keys,
        })
    }

    /// Verify signature, issuer and expiry of `token`.
    ///
    /// A `kid` in the header selects that key only; otherwise each key of the
    /// matching family is tried in order.
    pub(crate) fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let family = KeyFamily::of(header.alg).ok_or(AuthError::BadSignature)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.leeway_secs;
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let candidates = self.keys.iter().filter(|k| {
            k.family == family
                && match (&header.kid, &k.kid) {
                    (Some(wanted), Some(have)) => wanted == have,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
        });

        for candidate in candidates {
            match decode::<TokenClaims>(token, &candidate.key, &validation) {
                Ok(data) => return Ok(data.claims),
                Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {}
                Err(e) => return Err(map_jwt_error(e.kind())),
            }
        }
        Err(AuthError::BadSignature)
    }
}

fn map_jwt_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidEcdsaKey => AuthError::BadSignature,
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::Malformed(format!("missing required claim '{claim}'"))
        }
        other => AuthError::Malformed(format!("{other:?}")),
    }
}
