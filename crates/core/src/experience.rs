//! Experience store trait — prior ratings and notes from earlier work.
//!
//! The store itself is an external collaborator (a versioned, file-backed log
//! in a full deployment). The pipeline never talks to it directly; a source
//! may query it while building its fragment.

use crate::error::ExperienceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded experience: a note about a past task, with a rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceNote {
    /// Unique ID for this note
    pub id: String,

    /// What was learned
    pub content: String,

    /// Tags for categorization (usually aspect names)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// How useful this note proved, in [0.0, 1.0]
    #[serde(default)]
    pub rating: f64,

    /// When this note was recorded
    pub recorded_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f64,
}

/// A query for searching experience notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceQuery {
    /// The search text; matched word by word.
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum rating threshold
    #[serde(default)]
    pub min_rating: f64,

    /// Filter by tags (any match)
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_limit() -> usize {
    5
}

impl ExperienceQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: default_limit(),
            min_rating: 0.0,
            tags: Vec::new(),
        }
    }
}

/// The core ExperienceStore trait.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Record a note. Returns its id.
    async fn record(&self, note: ExperienceNote) -> Result<String, ExperienceError>;

    /// Search notes, best match first.
    async fn search(&self, query: ExperienceQuery) -> Result<Vec<ExperienceNote>, ExperienceError>;

    async fn get(&self, id: &str) -> Result<Option<ExperienceNote>, ExperienceError>;

    async fn count(&self) -> Result<usize, ExperienceError>;
}
