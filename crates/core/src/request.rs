//! Request — what the caller wants context for.

use crate::error::{Error, Result};
use crate::fragment::FragmentKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Budget used when the caller does not specify one.
pub const DEFAULT_TOKEN_BUDGET: usize = 4096;

/// The kind of task the assembled context is for. Drives section ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    BugFixing,
    Refactoring,
    CodeReview,
    SecurityAnalysis,
    TestGeneration,
    Documentation,
    Explanation,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeGeneration => "code_generation",
            Self::BugFixing => "bug_fixing",
            Self::Refactoring => "refactoring",
            Self::CodeReview => "code_review",
            Self::SecurityAnalysis => "security_analysis",
            Self::TestGeneration => "test_generation",
            Self::Documentation => "documentation",
            Self::Explanation => "explanation",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "code_generation" | "generation" => Ok(Self::CodeGeneration),
            "bug_fixing" | "bugfix" | "debugging" => Ok(Self::BugFixing),
            "refactoring" => Ok(Self::Refactoring),
            "code_review" | "review" => Ok(Self::CodeReview),
            "security_analysis" | "security" => Ok(Self::SecurityAnalysis),
            "test_generation" | "testing" => Ok(Self::TestGeneration),
            "documentation" => Ok(Self::Documentation),
            "explanation" => Ok(Self::Explanation),
            "general" => Ok(Self::General),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

/// How far afield sources should look.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Minimal,
    Local,
    #[default]
    Module,
    Project,
    Extended,
    Global,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "local" => Ok(Self::Local),
            "module" => Ok(Self::Module),
            "project" => Ok(Self::Project),
            "extended" => Ok(Self::Extended),
            "global" => Ok(Self::Global),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// A request for assembled context. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub task_description: String,

    #[serde(default)]
    pub task_type: TaskType,

    #[serde(default)]
    pub focus_areas: BTreeSet<String>,

    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default)]
    pub preferred_kinds: BTreeSet<FragmentKind>,

    #[serde(default)]
    pub excluded_kinds: BTreeSet<FragmentKind>,

    #[serde(default)]
    pub scope: Scope,

    /// Source-specific inputs (file paths, query strings, ...).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

impl Request {
    pub fn builder(task_description: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(task_description)
    }

    /// Check the request invariants: a non-blank task description and a
    /// positive budget.
    pub fn validate(&self) -> Result<()> {
        if self.task_description.trim().is_empty() {
            return Err(Error::InvalidRequest("task description is empty".into()));
        }
        if self.token_budget == 0 {
            return Err(Error::InvalidRequest("token budget must be > 0".into()));
        }
        Ok(())
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Whether `aspect` is one of the focus areas (case-insensitive).
    pub fn focuses_on(&self, aspect: &str) -> bool {
        self.focus_areas.iter().any(|f| f.eq_ignore_ascii_case(aspect))
    }
}

/// Builder for [`Request`]. Infallible; call [`Request::validate`] to check.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new(task_description: impl Into<String>) -> Self {
        Self {
            request: Request {
                task_description: task_description.into(),
                task_type: TaskType::default(),
                focus_areas: BTreeSet::new(),
                token_budget: DEFAULT_TOKEN_BUDGET,
                preferred_kinds: BTreeSet::new(),
                excluded_kinds: BTreeSet::new(),
                scope: Scope::default(),
                parameters: BTreeMap::new(),
            },
        }
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.request.task_type = task_type;
        self
    }

    pub fn focus(mut self, area: impl Into<String>) -> Self {
        self.request.focus_areas.insert(area.into());
        self
    }

    pub fn focus_areas<I, S>(mut self, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request
            .focus_areas
            .extend(areas.into_iter().map(Into::into));
        self
    }

    pub fn token_budget(mut self, budget: usize) -> Self {
        self.request.token_budget = budget;
        self
    }

    pub fn prefer(mut self, kind: FragmentKind) -> Self {
        self.request.preferred_kinds.insert(kind);
        self
    }

    pub fn exclude(mut self, kind: FragmentKind) -> Self {
        self.request.excluded_kinds.insert(kind);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.request.scope = scope;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.parameters.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}
