//! Path prefix matching.
//!
//! # Design Decisions
//! - Matching is segment-aware: `/api` matches `/api` and `/api/x`, never
//!   `/apiary`
//! - Path matching is case-sensitive
//! - The root prefix `/` matches every path
//! - No regex to guarantee O(n) matching

/// A normalized mount prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPrefix {
    prefix: String,
}

impl PathPrefix {
    /// Trailing slashes are dropped, except for the root itself.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        };
        Self { prefix }
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.prefix == "/"
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.is_root() {
            return true;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The part of `path` below this prefix, always starting with `/`.
    pub fn strip<'a>(&self, path: &'a str) -> &'a str {
        if self.is_root() {
            return path;
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some("") | None => "/",
            Some(rest) => rest,
        }
    }

    /// True when every path this prefix matches is also matched by `other`.
    pub fn is_within(&self, other: &PathPrefix) -> bool {
        other.matches(&self.prefix)
    }
}
