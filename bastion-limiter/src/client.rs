//! Quota key derivation.
//!
//! Authenticated callers are keyed by subject. Anonymous callers are keyed
//! by network address: the first `X-Forwarded-For` hop, then `X-Real-IP`,
//! then the socket peer. Either way the composite string is SHA-256 hashed
//! so raw addresses never end up in the store.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use bastion_core::{ContentHash, Identity};
use http::HeaderMap;
use sha2::{Digest, Sha256};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Hashed caller identity used as the first half of a quota key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(ContentHash);

impl ClientKey {
    /// Derive the key for a request.
    #[must_use]
    pub fn derive(identity: &Identity, headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let composite = match identity.subject() {
            Some(subject) => format!("sub:{subject}"),
            None => match client_address(headers, peer) {
                Some(addr) => format!("ip:{addr}"),
                None => "ip:unknown".to_owned(),
            },
        };
        Self(ContentHash::new(Sha256::digest(composite.as_bytes()).into()))
    }

    /// Store key for this client on `path_class`.
    #[must_use]
    pub fn quota_key(&self, path_class: &str) -> String {
        format!("{}:{path_class}", self.0)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Best-effort caller address from proxy headers, falling back to `peer`.
#[must_use]
pub fn client_address(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header(FORWARDED_FOR)
        .and_then(first_forwarded_hop)
        .or_else(|| header(REAL_IP).and_then(parse_addr))
        .or(peer)
}

/// First address of an `X-Forwarded-For` chain, if it parses.
#[must_use]
pub fn first_forwarded_hop(chain: &str) -> Option<IpAddr> {
    chain.split(',').next().and_then(parse_addr)
}

/// Accepts `1.2.3.4`, `1.2.3.4:80`, `::1` and `[::1]:80`.
fn parse_addr(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
        .or_else(|| raw.trim_start_matches('[').trim_end_matches(']').parse().ok())
}
