//! Environment source — a short description of the machine the task runs on.
//!
//! Only contributes when the request looks past the code itself: broad
//! scopes, or tasks where the runtime matters (bug fixing, security).

use async_trait::async_trait;
use contextloom_core::error::SourceError;
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::request::{Request, Scope, TaskType};
use contextloom_core::source::{ContextSource, SourceKind, SourceMetadata};

#[derive(Debug, Clone, Default)]
pub struct EnvironmentSource;

impl EnvironmentSource {
    pub fn new() -> Self {
        Self
    }

    fn describe() -> String {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "unknown".into());
        format!(
            "os: {}\nfamily: {}\narch: {}\ncwd: {}\n",
            std::env::consts::OS,
            std::env::consts::FAMILY,
            std::env::consts::ARCH,
            cwd
        )
    }
}

#[async_trait]
impl ContextSource for EnvironmentSource {
    fn name(&self) -> &str {
        "environment"
    }

    fn is_applicable(&self, request: &Request) -> Result<bool, SourceError> {
        Ok(request.scope >= Scope::Project
            || matches!(request.task_type, TaskType::BugFixing | TaskType::SecurityAnalysis))
    }

    async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
        Ok(Some(
            Fragment::builder(self.name(), FragmentKind::Environment, Self::describe())
                .relevance(0.4)
                .aspect("environment")
                .metadata("os", std::env::consts::OS)
                .build(),
        ))
    }

    fn priority(&self) -> u8 {
        20
    }

    fn estimated_cost(&self) -> usize {
        32
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name().into(),
            description: "Operating system, architecture and working directory".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            kind: SourceKind::Dynamic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_to_broad_scopes_and_runtime_tasks() {
        let source = EnvironmentSource::new();
        assert!(!source.is_applicable(&Request::builder("t").build()).unwrap());
        assert!(source.is_applicable(&Request::builder("t").scope(Scope::Global).build()).unwrap());
        assert!(source
            .is_applicable(&Request::builder("t").task_type(TaskType::BugFixing).build())
            .unwrap());
    }

    #[tokio::test]
    async fn describes_the_host() {
        let fragment = EnvironmentSource::new()
            .collect(&Request::builder("t").build())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fragment.kind, FragmentKind::Environment);
        assert!(fragment.content.contains(&format!("os: {}", std::env::consts::OS)));
        assert!(fragment.content.contains("cwd: "));
    }
}
