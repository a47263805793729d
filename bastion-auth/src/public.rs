//! Paths that bypass credential resolution entirely.

use serde::{Deserialize, Serialize};

/// One public path pattern: an exact path, or a prefix ending in `/*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PathPattern {
    /// Matches only this path.
    Exact(String),
    /// Matches this path and anything below it.
    Prefix(String),
}

impl PathPattern {
    /// `true` if `path` is covered by this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => path
                .strip_prefix(p.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

impl From<String> for PathPattern {
    fn from(s: String) -> Self {
        match s.strip_suffix("/*") {
            Some(prefix) => PathPattern::Prefix(prefix.to_owned()),
            None => PathPattern::Exact(s),
        }
    }
}

impl From<&str> for PathPattern {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<PathPattern> for String {
    fn from(p: PathPattern) -> Self {
        match p {
            PathPattern::Exact(s) => s,
            PathPattern::Prefix(s) => format!("{s}/*"),
        }
    }
}

/// The fixed exclusion list: health, login and public discovery endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicPaths(Vec<PathPattern>);

impl PublicPaths {
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathPattern>,
    {
        Self(patterns.into_iter().map(Into::into).collect())
    }

    /// `true` if `path` skips the claims resolver.
    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.0.iter().any(|p| p.matches(path))
    }
}

impl Default for PublicPaths {
    fn default() -> Self {
        Self::new([
            "/health/*",
            "/api/v1/auth/login",
            "/api/v1/auth/register",
            "/api/v1/auth/refresh",
            "/.well-known/*",
        ])
    }
}
