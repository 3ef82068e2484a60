//! Resource bounds — emergency trimming under count or memory pressure.
//!
//! When the collected fragments exceed the fragment-count ceiling, or their
//! estimated memory footprint exceeds the memory ceiling, only the top half
//! of the count ceiling survives, by relevance. This is lossy and logged.

use contextloom_core::fragment::Fragment;
use tracing::warn;

/// Result of a bounds check.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsOutcome {
    pub fragments: Vec<Fragment>,
    pub degraded: bool,
    /// Fragment count before trimming.
    pub count_before: usize,
    /// Estimated memory in bytes before trimming.
    pub memory_before: usize,
}

/// Ceilings applied right after collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBounds {
    pub max_fragments: usize,
    pub max_memory_bytes: usize,
}

impl ResourceBounds {
    pub fn new(max_fragments: usize, max_memory_bytes: usize) -> Self {
        Self {
            max_fragments,
            max_memory_bytes,
        }
    }

    /// Estimated memory footprint of `fragments` in bytes.
    pub fn estimate_memory(fragments: &[Fragment]) -> usize {
        fragments
            .iter()
            .map(Fragment::memory_footprint)
            .fold(0usize, usize::saturating_add)
    }

    /// Trim `fragments` if either ceiling is exceeded.
    ///
    /// The trim is a stable sort by relevance descending followed by a
    /// truncation to `max_fragments / 2`, so equal-relevance fragments keep
    /// their input order.
    pub fn enforce(&self, fragments: Vec<Fragment>) -> BoundsOutcome {
        let count_before = fragments.len();
        let memory_before = Self::estimate_memory(&fragments);

        let over_count = count_before > self.max_fragments;
        let over_memory = memory_before > self.max_memory_bytes;
        if !over_count && !over_memory {
            return BoundsOutcome {
                fragments,
                degraded: false,
                count_before,
                memory_before,
            };
        }

        let keep = self.max_fragments / 2;
        let mut fragments = fragments;
        fragments.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        fragments.truncate(keep);

        warn!(
            count_before,
            memory_before,
            max_fragments = self.max_fragments,
            max_memory_bytes = self.max_memory_bytes,
            kept = fragments.len(),
            over_count,
            over_memory,
            "Context degraded: trimmed fragments under resource pressure"
        );

        BoundsOutcome {
            fragments,
            degraded: true,
            count_before,
            memory_before,
        }
    }
}
