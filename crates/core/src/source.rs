//! Source trait — the abstraction over context producers.
//!
//! A source decides whether it applies to a request and, if so, produces at
//! most one [`Fragment`]. Sources are registered in a [`SourceRegistry`] and
//! run concurrently by the engine, which isolates every failure.

use crate::error::SourceError;
use crate::fragment::Fragment;
use crate::request::Request;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Default static weight of a source.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Default declared cost of running a source.
pub const DEFAULT_ESTIMATED_COST: usize = 100;

/// What a source reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Fixed artifacts (files, manifests).
    Static,
    /// Live runtime state.
    Dynamic,
    /// External resources (network, knowledge stores).
    External,
    /// A mix of the above.
    Hybrid,
}

/// Descriptive information about a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub kind: SourceKind,
}

/// The core ContextSource trait.
///
/// `is_applicable` should be cheap and side-effect free; `collect` may do I/O.
/// Returning `Ok(None)` means "nothing to contribute".
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// The unique name of this source (e.g., "files", "environment").
    fn name(&self) -> &str;

    /// Whether this source has anything to say about `request`.
    fn is_applicable(&self, request: &Request) -> Result<bool, SourceError>;

    /// Produce at most one fragment for `request`.
    async fn collect(&self, request: &Request) -> Result<Option<Fragment>, SourceError>;

    /// Static weight in 0..=100. Higher-priority sources win score ties.
    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    /// Declared cost, checked against the request budget before running.
    fn estimated_cost(&self) -> usize {
        DEFAULT_ESTIMATED_COST
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name().to_string(),
            description: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            kind: SourceKind::Static,
        }
    }
}

/// A thread-safe registry of sources.
///
/// Registration and removal may happen while assemblies are in flight; each
/// assembly works on a [`snapshot`](Self::snapshot) taken when it starts.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<Vec<Arc<dyn ContextSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Replaces any existing source with the same name.
    pub fn register(&self, source: Arc<dyn ContextSource>) {
        let name = source.name().to_string();
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = sources.iter_mut().find(|s| s.name() == name) {
            *slot = source;
            info!(source = %name, "Replaced context source");
        } else {
            sources.push(source);
            info!(source = %name, "Registered context source");
        }
    }

    /// Remove a source by name. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        let removed = sources.len() < before;
        if removed {
            info!(source = %name, "Removed context source");
        }
        removed
    }

    /// Point-in-time copy of the registered sources, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn ContextSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ContextSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    /// List all registered source names.
    pub fn names(&self) -> Vec<String> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
