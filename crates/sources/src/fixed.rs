//! Static source — a fixed piece of context, such as house style notes.

use async_trait::async_trait;
use contextloom_core::error::SourceError;
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::request::{Request, TaskType};
use contextloom_core::source::{ContextSource, SourceKind, SourceMetadata};
use std::collections::BTreeSet;

/// Contributes the same content to every matching request.
pub struct StaticSource {
    name: String,
    kind: FragmentKind,
    content: String,
    relevance: f64,
    aspects: BTreeSet<String>,
    task_types: BTreeSet<TaskType>,
    priority: u8,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, kind: FragmentKind, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            content: content.into(),
            relevance: 0.5,
            aspects: BTreeSet::new(),
            task_types: BTreeSet::new(),
            priority: contextloom_core::source::DEFAULT_PRIORITY,
        }
    }

    pub fn relevance(mut self, relevance: f64) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn aspect(mut self, aspect: impl Into<String>) -> Self {
        self.aspects.insert(aspect.into());
        self
    }

    /// Only apply to these task types. With none set, applies to all.
    pub fn for_task(mut self, task_type: TaskType) -> Self {
        self.task_types.insert(task_type);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(100);
        self
    }
}

#[async_trait]
impl ContextSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, request: &Request) -> Result<bool, SourceError> {
        Ok(self.task_types.is_empty() || self.task_types.contains(&request.task_type))
    }

    async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
        Ok(Some(
            Fragment::builder(&self.name, self.kind, &self.content)
                .relevance(self.relevance)
                .aspects(self.aspects.iter().cloned())
                .build(),
        ))
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn estimated_cost(&self) -> usize {
        contextloom_core::size::estimate_units(&self.content)
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name.clone(),
            description: format!("Static {} content", self.kind),
            version: env!("CARGO_PKG_VERSION").into(),
            kind: SourceKind::Static,
        }
    }
}
