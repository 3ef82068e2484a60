//! Path policy for file-backed sources.
//!
//! A requested path is rejected when it climbs out with `..`, falls under a
//! forbidden prefix, or (when roots are configured) lies outside every
//! allowed root. Existing paths are compared in canonical form, and so are
//! the configured prefixes, so a symlink on either side resolves before the
//! match. Prefixes that do not exist are also matched literally.

use std::path::{Component, Path, PathBuf};

/// Why a path was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' matches forbidden prefix '{prefix}'")]
    Forbidden { path: String, prefix: String },

    #[error("Path '{path}' climbs out of its directory")]
    Traversal { path: String },

    #[error("Cannot resolve path '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

/// Where file sources may read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPolicy {
    /// Empty allows every path not forbidden.
    pub allowed_roots: Vec<String>,
    pub forbidden_paths: Vec<String>,
}

impl PathPolicy {
    pub fn new(allowed_roots: Vec<String>, forbidden_paths: Vec<String>) -> Self {
        Self {
            allowed_roots,
            forbidden_paths,
        }
    }

    /// Check `path` and return its canonical form.
    pub fn check(&self, path: &str) -> Result<PathBuf, PathValidationError> {
        let raw = Path::new(path);
        if raw.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathValidationError::Traversal { path: path.into() });
        }

        let canonical = if raw.exists() {
            raw.canonicalize()
                .map_err(|e| PathValidationError::Unresolvable {
                    path: path.into(),
                    reason: e.to_string(),
                })?
        } else {
            raw.to_path_buf()
        };
        let resolved = normalize(&canonical.to_string_lossy());

        if let Some(prefix) = self.forbidden_paths.iter().find(|p| covers(p, &resolved)) {
            return Err(PathValidationError::Forbidden {
                path: path.into(),
                prefix: prefix.clone(),
            });
        }

        if !self.allowed_roots.is_empty()
            && !self
                .allowed_roots
                .iter()
                .any(|root| covers(root, &resolved))
        {
            return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
        }

        Ok(canonical)
    }
}

/// Forward slashes, lowercase, no `\\?\` prefix, no trailing slash.
fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/").to_lowercase();
    let unified = unified.strip_prefix("//?/").unwrap_or(&unified);
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether the configured `prefix` covers the normalized `resolved` path,
/// either as written or in canonical form.
fn covers(prefix: &str, resolved: &str) -> bool {
    let expanded = expand_tilde(prefix);
    if under(resolved, &normalize(&expanded)) {
        return true;
    }
    Path::new(&expanded)
        .canonicalize()
        .is_ok_and(|canonical| under(resolved, &normalize(&canonical.to_string_lossy())))
}

/// Prefix match on whole path components: `/proc` covers `/proc/1` but not `/process`.
fn under(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix('~'), home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => format!("{home}{rest}"),
        _ => path.to_string(),
    }
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}
