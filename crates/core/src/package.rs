//! Package — the assembled, rendered deliverable of one request.
//!
//! A package is created once per request and never changes afterward.
//! Callers tell "empty because nothing applied", "error because the pipeline
//! failed" and "trimmed under pressure" apart only through its metadata.

use crate::fragment::{Fragment, FragmentKind};
use crate::request::{Request, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata key carrying the [`PackageStatus`].
pub const STATUS_KEY: &str = "status";
/// Metadata key carrying a human-readable explanation for empty/error packages.
pub const MESSAGE_KEY: &str = "message";
/// Metadata key set to `"true"` when the engine trimmed fragments under pressure.
pub const DEGRADED_KEY: &str = "degraded";
/// Metadata key naming the pipeline stage that failed.
pub const FAILED_STAGE_KEY: &str = "failed_stage";

/// Outcome of an assembly as recorded in package metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Ok,
    Empty,
    Error,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Self::Ok),
            "empty" => Some(Self::Empty),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One rendered group of same-kind fragments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: FragmentKind,
    pub title: String,
    pub content: String,
}

/// The final assembled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub task_description: String,
    pub task_type: TaskType,
    pub sections: Vec<Section>,
    pub fragments: Vec<Fragment>,
    pub estimated_size: usize,
    pub metadata: BTreeMap<String, String>,
}

impl Package {
    /// A successful package. `estimated_size` is derived from the fragments.
    pub fn new(
        request: &Request,
        sections: Vec<Section>,
        fragments: Vec<Fragment>,
        mut metadata: BTreeMap<String, String>,
    ) -> Self {
        metadata
            .entry(STATUS_KEY.into())
            .or_insert_with(|| PackageStatus::Ok.as_str().into());
        let estimated_size = fragments.iter().map(|f| f.estimated_size).sum();
        Self {
            task_description: request.task_description.clone(),
            task_type: request.task_type,
            sections,
            fragments,
            estimated_size,
            metadata,
        }
    }

    /// A package with nothing in it, and no error flag.
    pub fn empty(request: &Request, reason: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(STATUS_KEY.into(), PackageStatus::Empty.as_str().into());
        metadata.insert(MESSAGE_KEY.into(), reason.into());
        Self::new(request, Vec::new(), Vec::new(), metadata)
    }

    /// An error-flagged package with no fragments.
    pub fn error(request: &Request, stage: &str, message: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(STATUS_KEY.into(), PackageStatus::Error.as_str().into());
        metadata.insert(MESSAGE_KEY.into(), message.into());
        metadata.insert(FAILED_STAGE_KEY.into(), stage.into());
        Self::new(request, Vec::new(), Vec::new(), metadata)
    }

    pub fn status(&self) -> PackageStatus {
        self.metadata
            .get(STATUS_KEY)
            .and_then(|s| PackageStatus::parse(s))
            .unwrap_or(PackageStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        self.status() == PackageStatus::Error
    }

    pub fn is_empty_result(&self) -> bool {
        self.status() == PackageStatus::Empty
    }

    pub fn is_degraded(&self) -> bool {
        self.metadata.get(DEGRADED_KEY).is_some_and(|v| v == "true")
    }

    /// Render as a flat Markdown document.
    pub fn render(&self) -> String {
        format!(
            "# Context for: {}\n\n{}",
            self.task_description,
            self.rendered_sections()
        )
    }

    /// Render through a caller-supplied template.
    ///
    /// Supported tokens: `{task}`, `{task_type}`, `{sections}`.
    pub fn render_template(&self, template: &str) -> String {
        template
            .replace("{task}", &self.task_description)
            .replace("{task_type}", self.task_type.as_str())
            .replace("{sections}", &self.rendered_sections())
    }

    fn rendered_sections(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Quality summary over a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_size: usize,
    pub fragment_count: usize,
    pub mean_relevance: f64,
    /// Fraction of required aspects present in at least one fragment.
    pub coverage: f64,
}

impl Metrics {
    /// Compute metrics over selected fragments.
    ///
    /// With no required aspects configured, coverage is vacuously 1.0.
    pub fn compute(fragments: &[Fragment], required_aspects: &[String]) -> Self {
        let fragment_count = fragments.len();
        let total_size = fragments.iter().map(|f| f.estimated_size).sum();
        let mean_relevance = if fragment_count == 0 {
            0.0
        } else {
            fragments.iter().map(|f| f.relevance).sum::<f64>() / fragment_count as f64
        };

        let coverage = if required_aspects.is_empty() {
            1.0
        } else {
            let covered = required_aspects
                .iter()
                .filter(|aspect| fragments.iter().any(|f| f.has_aspect(aspect)))
                .count();
            covered as f64 / required_aspects.len() as f64
        };

        Self {
            total_size,
            fragment_count,
            mean_relevance,
            coverage,
        }
    }

    /// Copy with ratio fields rounded to one decimal place.
    pub fn rounded(&self) -> Self {
        Self {
            mean_relevance: round1(self.mean_relevance),
            coverage: round1(self.coverage),
            ..*self
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
