//! Gateway configuration.
//!
//! Tunables come from a JSON document named by `BASTION_CONFIG`; secrets and
//! the listen address come from the environment. Every field has a default
//! so `{}` is a valid (if useless) configuration.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use bastion_auth::{AuthError, PublicPaths, ResolverSettings, TrustMaterial, TrustedKey};
use bastion_core::{CoreError, RouteTable};
use bastion_limiter::{QuotaPolicy, StoreError};
use bastion_router::{BreakerSettings, RoutingError, StaticDiscovery};
use serde::{Deserialize, Serialize};

/// Path of the JSON configuration document.
pub const CONFIG_PATH_VAR: &str = "BASTION_CONFIG";
/// Base64-encoded HMAC secret.
pub const JWT_SECRET_VAR: &str = "BASTION_JWT_SECRET";
/// Path of a PEM-encoded RSA public key.
pub const JWT_PUBLIC_KEY_PATH_VAR: &str = "BASTION_JWT_PUBLIC_KEY_PATH";
/// Socket address to listen on.
pub const LISTEN_ADDR_VAR: &str = "BASTION_LISTEN_ADDR";
/// Redis URL for shared quota counters.
pub const REDIS_URL_VAR: &str = "BASTION_REDIS_URL";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    /// The configuration document is not valid JSON for [`GatewayConfig`].
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The route table is inconsistent.
    #[error(transparent)]
    Routes(#[from] CoreError),

    /// A backend URL does not parse.
    #[error("invalid backend: {0}")]
    Backend(#[from] RoutingError),

    /// An environment variable holds an unusable value.
    #[error("invalid {var}: {reason}")]
    Env { var: &'static str, reason: String },

    /// The trust material could not be compiled.
    #[error(transparent)]
    Trust(#[from] AuthError),

    /// The shared quota store is unreachable at startup.
    #[error("quota store: {0}")]
    Store(#[from] StoreError),

    /// Neither an HMAC secret nor a public key was supplied.
    #[error("no signing key configured; set BASTION_JWT_SECRET or BASTION_JWT_PUBLIC_KEY_PATH")]
    NoTrustedKeys,
}

/// The `auth` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Required `iss` claim.
    pub issuer: String,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
    /// Required `aud` claim, if any.
    pub audience: Option<String>,
    /// Upper bound on how long verified claims stay cached.
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    /// Paths served to anonymous callers without a credential.
    pub public_paths: PublicPaths,
    /// A successful call to this path revokes the caller's credential.
    pub logout_path: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        let resolver = ResolverSettings::default();
        Self {
            issuer: "bastion".to_owned(),
            leeway_secs: 0,
            audience: None,
            cache_ttl_secs: resolver.cache_ttl.as_secs(),
            cache_capacity: resolver.cache_capacity,
            public_paths: PublicPaths::default(),
            logout_path: Some("/api/v1/auth/logout".to_owned()),
        }
    }
}

/// The `upstream` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSection {
    /// Per-attempt timeout for routes without their own, in milliseconds.
    pub default_timeout_ms: u64,
    /// Largest request body buffered for forwarding.
    pub max_body_bytes: usize,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self { default_timeout_ms: 10_000, max_body_bytes: 1024 * 1024 }
    }
}

impl UpstreamSection {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// One base URL or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendInstances {
    One(String),
    Many(Vec<String>),
}

impl BackendInstances {
    #[must_use]
    pub fn urls(&self) -> &[String] {
        match self {
            BackendInstances::One(url) => std::slice::from_ref(url),
            BackendInstances::Many(urls) => urls,
        }
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub auth: AuthSection,
    pub quota: QuotaPolicy,
    pub breaker: BreakerSettings,
    pub upstream: UpstreamSection,
    /// Logical backend name to base URL(s).
    pub backends: BTreeMap<String, BackendInstances>,
    pub routes: RouteTable,
    /// Interval of the revocation, claims cache and quota sweep.
    pub sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            auth: AuthSection::default(),
            quota: QuotaPolicy::default(),
            breaker: BreakerSettings::default(),
            upstream: UpstreamSection::default(),
            backends: BTreeMap::new(),
            routes: RouteTable::default(),
            sweep_interval_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed JSON or an invalid route
    /// table, and the [`validate`](Self::validate) errors otherwise.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        Self::from_json(&json)
    }

    /// Check that every route names a configured backend and every backend
    /// URL parses.
    ///
    /// # Errors
    /// Returns [`ConfigError::Routes`] or [`ConfigError::Backend`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let discovery = self.discovery()?;
        self.routes.check_backends(|backend| discovery.knows(backend))?;
        Ok(())
    }

    /// Static discovery over the `backends` section.
    ///
    /// # Errors
    /// Returns [`ConfigError::Backend`] if a URL lacks a scheme or host.
    pub fn discovery(&self) -> Result<StaticDiscovery, ConfigError> {
        let mut discovery = StaticDiscovery::new();
        for (name, instances) in &self.backends {
            for url in instances.urls() {
                discovery = discovery.with_instance(name.clone(), url)?;
            }
        }
        Ok(discovery)
    }

    #[must_use]
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            cache_ttl: Duration::from_secs(self.auth.cache_ttl_secs),
            cache_capacity: self.auth.cache_capacity.max(1),
        }
    }

    /// Trust material for the configured issuer.
    #[must_use]
    pub fn trust_material(&self, keys: Vec<TrustedKey>) -> TrustMaterial {
        TrustMaterial::new(self.auth.issuer.clone(), keys)
            .with_leeway(self.auth.leeway_secs)
            .with_audience(self.auth.audience.clone())
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Settings read from the process environment.
#[derive(Clone)]
pub struct RuntimeEnv {
    pub config_path: Option<PathBuf>,
    pub listen_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub jwt_secret: Option<Vec<u8>>,
    pub jwt_public_key_path: Option<PathBuf>,
}

impl std::fmt::Debug for RuntimeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEnv")
            .field("config_path", &self.config_path)
            .field("listen_addr", &self.listen_addr)
            .field("redis_url", &self.redis_url.as_ref().map(|_| ".."))
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| ".."))
            .field("jwt_public_key_path", &self.jwt_public_key_path)
            .finish()
    }
}

impl RuntimeEnv {
    /// Read the `BASTION_*` variables.
    ///
    /// # Errors
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read settings through `lookup`; empty values count as unset.
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] if the listen address does not parse or
    /// the secret is not valid base64.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let listen = get(LISTEN_ADDR_VAR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Env { var: LISTEN_ADDR_VAR, reason: e.to_string() })?;

        let jwt_secret = get(JWT_SECRET_VAR)
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| ConfigError::Env { var: JWT_SECRET_VAR, reason: e.to_string() })
            })
            .transpose()?;

        Ok(Self {
            config_path: get(CONFIG_PATH_VAR).map(PathBuf::from),
            listen_addr,
            redis_url: get(REDIS_URL_VAR),
            jwt_secret,
            jwt_public_key_path: get(JWT_PUBLIC_KEY_PATH_VAR).map(PathBuf::from),
        })
    }

    /// Signing keys from the secret and the public key file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Read`] if the key file cannot be read and
    /// [`ConfigError::NoTrustedKeys`] if neither source is set.
    pub fn trusted_keys(&self) -> Result<Vec<TrustedKey>, ConfigError> {
        let mut keys = Vec::new();
        if let Some(secret) = &self.jwt_secret {
            keys.push(TrustedKey::hmac(secret.clone()));
        }
        if let Some(path) = &self.jwt_public_key_path {
            let pem = std::fs::read_to_string(path)
                .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
            keys.push(TrustedKey::rsa_pem(pem));
        }
        if keys.is_empty() {
            return Err(ConfigError::NoTrustedKeys);
        }
        Ok(keys)
    }
}
