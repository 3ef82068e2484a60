//! # ContextLoom Engine
//!
//! The context assembly pipeline. A [`ContextEngine`] snapshots the source
//! registry, collects fragments concurrently, then runs them through
//! resource bounding, filtering, prioritization, and formatting:
//!
//! ```text
//! Request → collect (JoinSet) → bounds → filter → priority → format → Package + Metrics
//! ```
//!
//! Each stage is usable on its own; the engine only wires them together and
//! turns every failure into a flagged [`Package`](contextloom_core::Package).

pub mod bounds;
pub mod engine;
pub mod filter;
pub mod format;
pub mod priority;

pub use bounds::{BoundsOutcome, ResourceBounds};
pub use engine::{AssemblyResult, AssemblyStage, ContextEngine, ContextEngineBuilder};
pub use filter::{FilterRule, FilterStage, FnRule, rule};
pub use format::{FormatStage, section_order};
pub use priority::{PriorityStage, ScoredFragment, score};

use std::any::Any;

/// Best-effort text of a caught panic payload.
#[allow(clippy::borrowed_box)]
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
