//! Logical backend name to instance resolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::Uri;

use crate::RoutingError;

/// Base address of one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    authority: Authority,
}

impl Endpoint {
    /// Parse a base URL such as `http://orders:8080`.
    ///
    /// # Errors
    /// Returns [`RoutingError::InvalidRequest`] if `url` lacks a scheme or host.
    pub fn parse(url: &str) -> Result<Self, RoutingError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| RoutingError::InvalidRequest(format!("backend url {url}: {e}")))?;
        let parts = uri.into_parts();
        match (parts.scheme, parts.authority) {
            (Some(scheme), Some(authority)) => Ok(Self { scheme, authority }),
            _ => Err(RoutingError::InvalidRequest(format!(
                "backend url {url} needs a scheme and host"
            ))),
        }
    }

    #[must_use]
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Absolute URI for `path_and_query` on this instance.
    ///
    /// # Errors
    /// Returns [`RoutingError::InvalidRequest`] if the result is not a valid URI.
    pub fn uri_for(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, RoutingError> {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query.map_or("/", PathAndQuery::as_str))
            .build()
            .map_err(|e| RoutingError::InvalidRequest(e.to_string()))
    }
}

/// Resolves a logical backend name to a concrete instance.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Pick an instance of `backend` for the next attempt.
    ///
    /// # Errors
    /// Returns [`RoutingError::NoBackend`] if no instance is known.
    async fn resolve(&self, backend: &str) -> Result<Endpoint, RoutingError>;
}

/// Fixed instance lists from configuration, picked round-robin.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    backends: HashMap<String, Vec<Endpoint>>,
    cursor: AtomicUsize,
}

impl StaticDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register one instance URL under `backend`.
    ///
    /// # Errors
    /// Returns [`RoutingError::InvalidRequest`] if `url` does not parse.
    pub fn with_instance(mut self, backend: impl Into<String>, url: &str) -> Result<Self, RoutingError> {
        let endpoint = Endpoint::parse(url)?;
        self.backends.entry(backend.into()).or_default().push(endpoint);
        Ok(self)
    }

    /// `true` if at least one instance of `backend` is registered.
    #[must_use]
    pub fn knows(&self, backend: &str) -> bool {
        self.backends.get(backend).is_some_and(|e| !e.is_empty())
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn resolve(&self, backend: &str) -> Result<Endpoint, RoutingError> {
        let instances = self
            .backends
            .get(backend)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| RoutingError::NoBackend { backend: backend.to_owned() })?;
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(instances[n % instances.len()].clone())
    }
}
