//! Task description source — restates the request itself as context.

use async_trait::async_trait;
use contextloom_core::error::SourceError;
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::request::Request;
use contextloom_core::source::{ContextSource, SourceKind, SourceMetadata};

#[derive(Debug, Clone, Default)]
pub struct TaskDescriptionSource;

impl TaskDescriptionSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextSource for TaskDescriptionSource {
    fn name(&self) -> &str {
        "task"
    }

    fn is_applicable(&self, request: &Request) -> Result<bool, SourceError> {
        Ok(!request.task_description.trim().is_empty())
    }

    async fn collect(&self, request: &Request) -> Result<Option<Fragment>, SourceError> {
        let mut content = format!("Task ({}): {}\n", request.task_type, request.task_description.trim());
        if !request.focus_areas.is_empty() {
            let focus: Vec<&str> = request.focus_areas.iter().map(String::as_str).collect();
            content.push_str(&format!("Focus: {}\n", focus.join(", ")));
        }

        Ok(Some(
            Fragment::builder(self.name(), FragmentKind::TaskDescription, content)
                .relevance(1.0)
                .aspects(request.focus_areas.iter().cloned())
                .build(),
        ))
    }

    fn priority(&self) -> u8 {
        100
    }

    fn estimated_cost(&self) -> usize {
        1
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name().into(),
            description: "The task description and focus areas".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            kind: SourceKind::Dynamic,
        }
    }
}
