//! Route table.
//!
//! # Responsibilities
//! - Store prefix → router bindings in registration order
//! - Reject bindings that could never be reached
//! - Yield the bindings matching a path, first registered first
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(n) prefix scan (acceptable for a handful of resources)
//! - The root prefix may precede more specific prefixes because its router
//!   passes on paths it does not own; any other shorter prefix registered
//!   before a longer one would shadow it and is rejected

use std::sync::Arc;

use crate::routing::collaborator::ResourceRouter;
use crate::routing::matcher::PathPrefix;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("mount prefix '{0}' must start with '/'")]
    InvalidPrefix(String),
    #[error("mount prefix '{0}' registered twice")]
    DuplicatePrefix(String),
    #[error("mount prefix '{prefix}' is shadowed by earlier prefix '{by}'")]
    Shadowed { prefix: String, by: String },
    #[error("route table has no bindings")]
    Empty,
}

#[derive(Clone)]
pub struct RouteBinding {
    prefix: PathPrefix,
    router: Arc<dyn ResourceRouter>,
}

impl RouteBinding {
    pub fn prefix(&self) -> &PathPrefix {
        &self.prefix
    }

    pub fn router(&self) -> &Arc<dyn ResourceRouter> {
        &self.router
    }
}

impl std::fmt::Debug for RouteBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteBinding")
            .field("prefix", &self.prefix.as_str())
            .field("router", &self.router.name())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    bindings: Vec<RouteBinding>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Bindings whose prefix matches `path`, in registration order.
    pub fn matching<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a RouteBinding> + 'a {
        self.bindings.iter().filter(move |b| b.prefix.matches(path))
    }

    pub fn prefixes(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.prefix.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[derive(Default)]
pub struct RouteTableBuilder {
    mounts: Vec<(String, Arc<dyn ResourceRouter>)>,
}

impl RouteTableBuilder {
    pub fn mount(mut self, prefix: impl Into<String>, router: Arc<dyn ResourceRouter>) -> Self {
        self.mounts.push((prefix.into(), router));
        self
    }

    pub fn build(self) -> Result<RouteTable, RoutingError> {
        if self.mounts.is_empty() {
            return Err(RoutingError::Empty);
        }

        let mut bindings: Vec<RouteBinding> = Vec::with_capacity(self.mounts.len());
        for (raw, router) in self.mounts {
            if !raw.starts_with('/') {
                return Err(RoutingError::InvalidPrefix(raw));
            }
            let prefix = PathPrefix::new(&raw);

            for earlier in &bindings {
                if earlier.prefix == prefix {
                    return Err(RoutingError::DuplicatePrefix(prefix.as_str().to_string()));
                }
                if !earlier.prefix.is_root() && prefix.is_within(&earlier.prefix) {
                    return Err(RoutingError::Shadowed {
                        prefix: prefix.as_str().to_string(),
                        by: earlier.prefix.as_str().to_string(),
                    });
                }
            }

            tracing::debug!(prefix = %prefix.as_str(), router = %router.name(), "Mounted router");
            bindings.push(RouteBinding { prefix, router });
        }

        Ok(RouteTable { bindings })
    }
}
