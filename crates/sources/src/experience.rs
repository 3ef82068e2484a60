//! Experience source — prior notes relevant to the task.
//!
//! Queries an [`ExperienceStore`] with the task description, restricted to
//! the request's focus areas when it has any, and folds the hits into one
//! fragment. Relevance follows how well the best notes matched and how
//! highly they were rated.

use async_trait::async_trait;
use contextloom_core::error::SourceError;
use contextloom_core::experience::{ExperienceQuery, ExperienceStore};
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::request::Request;
use contextloom_core::source::{ContextSource, SourceKind, SourceMetadata};
use std::sync::Arc;
use tracing::debug;

pub struct ExperienceSource {
    store: Arc<dyn ExperienceStore>,
    limit: usize,
    min_rating: f64,
}

impl ExperienceSource {
    pub fn new(store: Arc<dyn ExperienceStore>) -> Self {
        Self {
            store,
            limit: 5,
            min_rating: 0.3,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn min_rating(mut self, min_rating: f64) -> Self {
        self.min_rating = min_rating;
        self
    }
}

#[async_trait]
impl ContextSource for ExperienceSource {
    fn name(&self) -> &str {
        "experience"
    }

    fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
        Ok(self.limit > 0)
    }

    async fn collect(&self, request: &Request) -> Result<Option<Fragment>, SourceError> {
        let query = ExperienceQuery {
            text: request.task_description.clone(),
            limit: self.limit,
            min_rating: self.min_rating,
            tags: request.focus_areas.iter().cloned().collect(),
        };

        let notes = self
            .store
            .search(query)
            .await
            .map_err(|e| SourceError::CollectionFailed {
                source_name: self.name().into(),
                reason: e.to_string(),
            })?;

        if notes.is_empty() {
            debug!(store = %self.store.name(), "No matching experience");
            return Ok(None);
        }

        let content = notes
            .iter()
            .map(|n| format!("- ({:.1}) {}", n.rating, n.content.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        let relevance = notes.iter().map(|n| n.score * n.rating).sum::<f64>() / notes.len() as f64;

        Ok(Some(
            Fragment::builder(self.name(), FragmentKind::Experience, content)
                .relevance(relevance)
                .aspects(notes.iter().flat_map(|n| n.tags.iter().cloned()))
                .metadata("notes", notes.len().to_string())
                .metadata("store", self.store.name())
                .build(),
        ))
    }

    fn priority(&self) -> u8 {
        40
    }

    /// One short note line. The notes themselves are unknown until searched.
    fn estimated_cost(&self) -> usize {
        4
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name().into(),
            description: "Rated notes from earlier work".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            kind: SourceKind::External,
        }
    }
}
