//! In-memory experience store — for tests and one-shot CLI runs.

use async_trait::async_trait;
use contextloom_core::error::ExperienceError;
use contextloom_core::experience::{ExperienceNote, ExperienceQuery, ExperienceStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Keeps notes in a `Vec`; nothing survives the process.
pub struct InMemoryExperienceStore {
    notes: Arc<RwLock<Vec<ExperienceNote>>>,
}

impl InMemoryExperienceStore {
    pub fn new() -> Self {
        Self {
            notes: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryExperienceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl ExperienceStore for InMemoryExperienceStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn record(&self, mut note: ExperienceNote) -> Result<String, ExperienceError> {
        if note.id.is_empty() {
            note.id = Uuid::new_v4().to_string();
        }
        if !(0.0..=1.0).contains(&note.rating) {
            return Err(ExperienceError::Storage(format!(
                "rating {} is outside [0, 1]",
                note.rating
            )));
        }
        let id = note.id.clone();
        self.notes.write().await.push(note);
        Ok(id)
    }

    /// Score is the share of query words found in the note.
    async fn search(&self, query: ExperienceQuery) -> Result<Vec<ExperienceNote>, ExperienceError> {
        if query.limit == 0 {
            return Err(ExperienceError::QueryFailed("limit must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&query.min_rating) {
            return Err(ExperienceError::QueryFailed(format!(
                "min_rating {} is outside [0, 1]",
                query.min_rating
            )));
        }
        let wanted = words(&query.text);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let notes = self.notes.read().await;
        let mut results: Vec<ExperienceNote> = notes
            .iter()
            .filter(|n| n.rating >= query.min_rating)
            .filter(|n| query.tags.is_empty() || query.tags.iter().any(|t| n.tags.contains(t)))
            .filter_map(|n| {
                let have = words(&n.content);
                let matched = wanted.intersection(&have).count();
                (matched > 0).then(|| {
                    let mut hit = n.clone();
                    hit.score = matched as f64 / wanted.len() as f64;
                    hit
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.rating.total_cmp(&a.rating))
        });
        results.truncate(query.limit);
        Ok(results)
    }

    async fn get(&self, id: &str) -> Result<Option<ExperienceNote>, ExperienceError> {
        Ok(self.notes.read().await.iter().find(|n| n.id == id).cloned())
    }

    async fn count(&self) -> Result<usize, ExperienceError> {
        Ok(self.notes.read().await.len())
    }
}
