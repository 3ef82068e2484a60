//! Built-in context sources for ContextLoom.
//!
//! Each source implements [`ContextSource`] and contributes at most one
//! fragment per request. [`default_registry`] wires up the standard set
//! from configuration.

pub mod environment;
pub mod experience;
pub mod file;
pub mod fixed;
pub mod path;
pub mod store;
pub mod task;

pub use environment::EnvironmentSource;
pub use experience::ExperienceSource;
pub use file::{FILES_PARAM, FileSource};
pub use fixed::StaticSource;
pub use path::{PathPolicy, PathValidationError};
pub use store::InMemoryExperienceStore;
pub use task::TaskDescriptionSource;

use contextloom_config::SourcesConfig;
use contextloom_core::experience::ExperienceStore;
use contextloom_core::source::SourceRegistry;
use std::sync::Arc;

/// Build a registry with the standard sources.
///
/// The task and file sources are always present; the environment source
/// follows `config.environment`; the experience source is added only when a
/// store is supplied.
pub fn default_registry(config: &SourcesConfig, store: Option<Arc<dyn ExperienceStore>>) -> SourceRegistry {
    let registry = SourceRegistry::new();

    registry.register(Arc::new(TaskDescriptionSource::new()));
    let policy = PathPolicy::new(config.allowed_roots.clone(), config.forbidden_paths.clone());
    registry.register(Arc::new(FileSource::new(policy, config.max_file_bytes)));

    if config.environment {
        registry.register(Arc::new(EnvironmentSource::new()));
    }
    if let Some(store) = store {
        registry.register(Arc::new(ExperienceSource::new(store)));
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_follows_config() {
        let config = SourcesConfig::default();
        let registry = default_registry(&config, None);
        assert_eq!(registry.names(), vec!["task", "files", "environment"]);

        let config = SourcesConfig {
            environment: false,
            ..SourcesConfig::default()
        };
        let store: Arc<dyn ExperienceStore> = Arc::new(InMemoryExperienceStore::new());
        let registry = default_registry(&config, Some(store));
        assert_eq!(registry.names(), vec!["task", "files", "experience"]);
    }
}
