//! Post-login redirect targets.
//!
//! A target is only accepted if it is a path inside this application.
//! Anything that a browser could resolve to another origin falls back to `/`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted redirect target.
const MAX_TARGET_LEN: usize = 2048;

/// A validated in-application relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RedirectTarget(String);

impl RedirectTarget {
    /// The application root.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Validates a candidate target.
    ///
    /// Accepts paths with a single leading `/`. Rejects protocol-relative
    /// (`//host`), backslash, scheme-bearing, control-character and overlong
    /// inputs.
    #[must_use]
    pub fn parse(candidate: &str) -> Option<Self> {
        if candidate.is_empty() || candidate.len() > MAX_TARGET_LEN {
            return None;
        }
        if !candidate.starts_with('/') || candidate.starts_with("//") {
            return None;
        }
        // Browsers normalise `\` to `/`, so `/\host` is protocol-relative.
        if candidate.contains('\\') {
            return None;
        }
        if candidate.chars().any(char::is_control) {
            return None;
        }
        // Percent-encoded slashes and backslashes right after the leading `/`
        // decode into the same tricks.
        let lower = candidate.to_ascii_lowercase();
        if lower.starts_with("/%2f") || lower.starts_with("/%5c") {
            return None;
        }
        // Some proxies collapse duplicate slashes; keep embedded URLs out of the path.
        let path_end = candidate.find(['?', '#']).unwrap_or(candidate.len());
        if candidate[..path_end].contains("://") {
            return None;
        }
        Some(Self(candidate.to_string()))
    }

    /// Validates a candidate, falling back to the root.
    #[must_use]
    pub fn parse_or_root(candidate: Option<&str>) -> Self {
        match candidate {
            None => Self::root(),
            Some(candidate) => Self::parse(candidate).unwrap_or_else(|| {
                tracing::debug!(len = candidate.len(), "rejected redirect target");
                Self::root()
            }),
        }
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RedirectTarget {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for RedirectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
