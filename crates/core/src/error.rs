//! Error types for the ContextLoom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; only request validation and
//! formatting are fatal to a whole assembly.

use thiserror::Error;

/// The top-level error type for pipeline-fatal failures.
///
/// The engine never surfaces this to its caller: it is converted into an
/// error-flagged `Package` at the engine boundary.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request validation ---
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Stage errors ---
    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Applicability check failed for {source_name}: {reason}")]
    ApplicabilityFailed { source_name: String, reason: String },

    #[error("Collection failed for {source_name}: {reason}")]
    CollectionFailed { source_name: String, reason: String },

    #[error("Source {source_name} timed out after {timeout_secs}s")]
    Timeout { source_name: String, timeout_secs: u64 },

    #[error("Source {source_name} panicked: {message}")]
    Panicked { source_name: String, message: String },

    #[error("Missing request parameter: {0}")]
    MissingParameter(String),
}

#[derive(Debug, Clone, Error)]
pub enum FilterError {
    #[error("Filter rule '{rule}' failed: {reason}")]
    RuleFailed { rule: String, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("Formatter write error")]
    Write(#[from] std::fmt::Error),
}

#[derive(Debug, Error)]
pub enum ExperienceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_displays_correctly() {
        let err = SourceError::CollectionFailed {
            source_name: "git_history".into(),
            reason: "repository not found".into(),
        };
        assert!(err.to_string().contains("git_history"));
        assert!(err.to_string().contains("repository not found"));
    }

    #[test]
    fn filter_error_displays_correctly() {
        let err = FilterError::RuleFailed {
            rule: "no_secrets".into(),
            reason: "regex exploded".into(),
        };
        assert!(err.to_string().contains("no_secrets"));
        assert!(err.to_string().contains("regex exploded"));
    }

    #[test]
    fn fmt_error_converts_into_format_error() {
        let err: FormatError = std::fmt::Error.into();
        assert!(matches!(err, FormatError::Write(_)));
        let fatal: Error = err.into();
        assert!(fatal.to_string().starts_with("Format error"));
    }
}
