//! Fragment — one unit of collected context.
//!
//! A fragment carries the textual payload a source produced plus everything
//! the pipeline needs to rank it: a relevance score, a size cost, a creation
//! timestamp, aspect tags, and the ids of fragments it depends on.
//!
//! Fragments are immutable once built. "Enhancing" a fragment goes through
//! the `with_*` methods, which return a new fragment. Relevance is clamped to
//! [0.0, 1.0] on every way in: the builder, the `with_relevance` copy and
//! deserialization.

use crate::size;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// The category of a fragment.
///
/// Grouped along the axes the sources cover: code, project, runtime, VCS,
/// environment, task, domain, and external knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FragmentKind {
    // code
    CodeStructure,
    Implementation,
    Dependencies,
    Examples,
    TestCode,
    // project
    ProjectStructure,
    Configuration,
    BuildSystem,
    Documentation,
    // runtime
    RuntimeErrors,
    RuntimeState,
    Logs,
    PerformanceMetrics,
    // vcs
    VcsHistory,
    VcsDiff,
    VcsBlame,
    // environment
    Environment,
    SystemInfo,
    // task
    TaskDescription,
    TaskHistory,
    Requirements,
    // domain
    DomainPatterns,
    DomainKnowledge,
    BestPractices,
    // external
    ExternalDocs,
    ApiReference,
    Experience,
}

impl FragmentKind {
    /// Every kind, in declaration order.
    pub const ALL: [FragmentKind; 27] = [
        Self::CodeStructure,
        Self::Implementation,
        Self::Dependencies,
        Self::Examples,
        Self::TestCode,
        Self::ProjectStructure,
        Self::Configuration,
        Self::BuildSystem,
        Self::Documentation,
        Self::RuntimeErrors,
        Self::RuntimeState,
        Self::Logs,
        Self::PerformanceMetrics,
        Self::VcsHistory,
        Self::VcsDiff,
        Self::VcsBlame,
        Self::Environment,
        Self::SystemInfo,
        Self::TaskDescription,
        Self::TaskHistory,
        Self::Requirements,
        Self::DomainPatterns,
        Self::DomainKnowledge,
        Self::BestPractices,
        Self::ExternalDocs,
        Self::ApiReference,
        Self::Experience,
    ];

    /// The snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeStructure => "code_structure",
            Self::Implementation => "implementation",
            Self::Dependencies => "dependencies",
            Self::Examples => "examples",
            Self::TestCode => "test_code",
            Self::ProjectStructure => "project_structure",
            Self::Configuration => "configuration",
            Self::BuildSystem => "build_system",
            Self::Documentation => "documentation",
            Self::RuntimeErrors => "runtime_errors",
            Self::RuntimeState => "runtime_state",
            Self::Logs => "logs",
            Self::PerformanceMetrics => "performance_metrics",
            Self::VcsHistory => "vcs_history",
            Self::VcsDiff => "vcs_diff",
            Self::VcsBlame => "vcs_blame",
            Self::Environment => "environment",
            Self::SystemInfo => "system_info",
            Self::TaskDescription => "task_description",
            Self::TaskHistory => "task_history",
            Self::Requirements => "requirements",
            Self::DomainPatterns => "domain_patterns",
            Self::DomainKnowledge => "domain_knowledge",
            Self::BestPractices => "best_practices",
            Self::ExternalDocs => "external_docs",
            Self::ApiReference => "api_reference",
            Self::Experience => "experience",
        }
    }

    /// Human-readable title: the wire name word-split and title-cased.
    ///
    /// `runtime_errors` → `Runtime Errors`.
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FragmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| format!("unknown fragment kind: {s}"))
    }
}

/// A single collected piece of context.
///
/// Construct with [`Fragment::builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFragment")]
#[non_exhaustive]
pub struct Fragment {
    /// Opaque unique id.
    pub id: String,

    /// Name of the producing source.
    pub source: String,

    /// Category of this fragment.
    pub kind: FragmentKind,

    /// The textual payload.
    pub content: String,

    /// Free-form tags used for focus-area matching.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub aspects: BTreeSet<String>,

    /// Relevance set by the producing source, in [0.0, 1.0].
    pub relevance: f64,

    /// Cost units charged against the budget.
    pub estimated_size: usize,

    /// When this fragment was created.
    pub timestamp: DateTime<Utc>,

    /// Ids of fragments that must be selected before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Source-specific annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Fragment {
    /// Start building a fragment. `source`, `kind` and `content` are required.
    pub fn builder(
        source: impl Into<String>,
        kind: FragmentKind,
        content: impl Into<String>,
    ) -> FragmentBuilder {
        FragmentBuilder::new(source, kind, content)
    }

    /// Age in fractional minutes relative to `now`. Future timestamps count as zero.
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.timestamp).num_milliseconds().max(0);
        millis as f64 / 60_000.0
    }

    /// Estimated in-memory footprint in bytes.
    pub fn memory_footprint(&self) -> usize {
        size::estimate_memory(
            self.content.len(),
            self.metadata.len(),
            self.aspects.len() + self.dependencies.len(),
        )
    }

    /// Whether any of the given aspects is tagged on this fragment (case-insensitive).
    pub fn has_aspect(&self, aspect: &str) -> bool {
        self.aspects.iter().any(|a| a.eq_ignore_ascii_case(aspect))
    }

    /// Copy with one extra metadata entry.
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value.into());
        next
    }

    /// Copy with a different relevance (clamped).
    pub fn with_relevance(&self, relevance: f64) -> Self {
        let mut next = self.clone();
        next.relevance = clamp_relevance(relevance);
        next
    }

    /// Copy with one extra aspect tag.
    pub fn with_aspect(&self, aspect: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.aspects.insert(aspect.into());
        next
    }

    /// Copy attributed to a different source.
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.source = source.into();
        next
    }

    /// Whether relevance lies in [0.0, 1.0].
    pub fn relevance_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.relevance)
    }
}

/// Wire form of a [`Fragment`], before relevance is clamped.
#[derive(Deserialize)]
struct RawFragment {
    id: String,
    source: String,
    kind: FragmentKind,
    content: String,
    #[serde(default)]
    aspects: BTreeSet<String>,
    relevance: f64,
    estimated_size: usize,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl From<RawFragment> for Fragment {
    fn from(raw: RawFragment) -> Self {
        Self {
            id: raw.id,
            source: raw.source,
            kind: raw.kind,
            content: raw.content,
            aspects: raw.aspects,
            relevance: clamp_relevance(raw.relevance),
            estimated_size: raw.estimated_size,
            timestamp: raw.timestamp,
            dependencies: raw.dependencies,
            metadata: raw.metadata,
        }
    }
}

fn clamp_relevance(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Builder for [`Fragment`].
#[derive(Debug, Clone)]
pub struct FragmentBuilder {
    id: Option<String>,
    source: String,
    kind: FragmentKind,
    content: String,
    aspects: BTreeSet<String>,
    relevance: f64,
    estimated_size: Option<usize>,
    timestamp: Option<DateTime<Utc>>,
    dependencies: Vec<String>,
    metadata: BTreeMap<String, String>,
}

impl FragmentBuilder {
    pub fn new(source: impl Into<String>, kind: FragmentKind, content: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            kind,
            content: content.into(),
            aspects: BTreeSet::new(),
            relevance: 0.5,
            estimated_size: None,
            timestamp: None,
            dependencies: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn aspect(mut self, aspect: impl Into<String>) -> Self {
        self.aspects.insert(aspect.into());
        self
    }

    pub fn aspects<I, S>(mut self, aspects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aspects.extend(aspects.into_iter().map(Into::into));
        self
    }

    /// Override the size estimate derived from the content.
    pub fn estimated_size(mut self, size: usize) -> Self {
        self.estimated_size = Some(size);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Fragment {
        let estimated_size = self
            .estimated_size
            .unwrap_or_else(|| size::estimate_units(&self.content));
        Fragment {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: self.source,
            kind: self.kind,
            content: self.content,
            aspects: self.aspects,
            relevance: clamp_relevance(self.relevance),
            estimated_size,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            dependencies: self.dependencies,
            metadata: self.metadata,
        }
    }
}
