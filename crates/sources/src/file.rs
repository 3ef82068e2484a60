//! File source — reads the files named in the request.
//!
//! Paths come from the `files` request parameter, comma separated. Each one
//! is checked against the [`PathPolicy`] before it is read; refused,
//! missing, or oversized files are skipped with a warning. The readable
//! files are concatenated into a single fragment.

use crate::path::PathPolicy;
use async_trait::async_trait;
use contextloom_core::error::SourceError;
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::request::Request;
use contextloom_core::source::{ContextSource, SourceKind, SourceMetadata};
use tracing::{debug, warn};

/// Request parameter listing the files to read.
pub const FILES_PARAM: &str = "files";

/// Relevance given to explicitly requested files.
const FILE_RELEVANCE: f64 = 0.8;

/// Declared cost: a single path header. File sizes are unknown until read.
const DECLARED_COST: usize = 4;

pub struct FileSource {
    policy: PathPolicy,
    max_file_bytes: usize,
}

impl FileSource {
    pub fn new(policy: PathPolicy, max_file_bytes: usize) -> Self {
        Self {
            policy,
            max_file_bytes,
        }
    }

    fn requested_paths(request: &Request) -> Vec<&str> {
        request
            .parameter(FILES_PARAM)
            .map(|raw| raw.split(',').map(str::trim).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default()
    }

    async fn read_one(&self, path: &str) -> Option<String> {
        let resolved = match self.policy.check(path) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(path, error = %e, "Refusing to read file");
                return None;
            }
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() > self.max_file_bytes as u64 => {
                warn!(path, size = meta.len(), limit = self.max_file_bytes, "File too large, skipping");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(path, error = %e, "Cannot stat file, skipping");
                return None;
            }
        }

        match tokio::fs::read_to_string(&resolved).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(path, error = %e, "Failed to read file, skipping");
                None
            }
        }
    }
}

/// A set made only of test files is test code; anything else is implementation.
fn kind_for(paths: &[&str]) -> FragmentKind {
    let all_tests = paths.iter().all(|p| {
        let lower = p.to_lowercase();
        lower.contains("/tests/") || lower.starts_with("tests/") || lower.contains("_test.") || lower.contains(".test.")
    });
    if all_tests {
        FragmentKind::TestCode
    } else {
        FragmentKind::Implementation
    }
}

fn extension_aspect(path: &str) -> Option<String> {
    let ext = std::path::Path::new(path).extension()?.to_str()?;
    let aspect = match ext {
        "rs" => "rust",
        "py" => "python",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        "toml" | "yaml" | "yml" | "json" => "configuration",
        "md" => "documentation",
        other => other,
    };
    Some(aspect.to_string())
}

#[async_trait]
impl ContextSource for FileSource {
    fn name(&self) -> &str {
        "files"
    }

    fn is_applicable(&self, request: &Request) -> Result<bool, SourceError> {
        Ok(!Self::requested_paths(request).is_empty())
    }

    async fn collect(&self, request: &Request) -> Result<Option<Fragment>, SourceError> {
        let paths = Self::requested_paths(request);
        if paths.is_empty() {
            return Err(SourceError::MissingParameter(FILES_PARAM.into()));
        }
        let mut content = String::new();
        let mut read: Vec<&str> = Vec::new();

        for path in &paths {
            let Some(text) = self.read_one(path).await else {
                continue;
            };
            if !content.is_empty() {
                content.push('\n');
            }
            content.push_str(&format!("// {path}\n"));
            content.push_str(text.trim_end());
            content.push('\n');
            read.push(path);
        }

        if read.is_empty() {
            return Err(SourceError::CollectionFailed {
                source_name: self.name().into(),
                reason: format!("none of {} requested file(s) could be read", paths.len()),
            });
        }
        debug!(files = read.len(), bytes = content.len(), "Read requested files");

        let fragment = Fragment::builder(self.name(), kind_for(&read), content)
            .relevance(FILE_RELEVANCE)
            .aspects(read.iter().filter_map(|p| extension_aspect(p)))
            .metadata("files", read.join(", "))
            .build();
        Ok(Some(fragment))
    }

    fn priority(&self) -> u8 {
        80
    }

    fn estimated_cost(&self) -> usize {
        DECLARED_COST
    }

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            name: self.name().into(),
            description: "Contents of files named in the request".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            kind: SourceKind::Dynamic,
        }
    }
}
