//! Configuration loading, validation, and management for ContextLoom.
//!
//! Loads configuration from `~/.contextloom/config.toml` with environment
//! variable overrides. Validates all settings at startup; the engine takes
//! its configuration at construction time and never mutates it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.contextloom/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Assembly pipeline settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Built-in source settings
    #[serde(default)]
    pub sources: SourcesConfig,
}

/// How the priority stage treats inter-fragment dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyOrdering {
    /// One forward pass in score order: a dependency that scores lower than
    /// its dependent gates the dependent out.
    #[default]
    SinglePass,
    /// Reorder candidates so dependencies precede dependents before the walk.
    Topological,
}

/// Settings for the assembly pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fragments below this relevance are filtered out.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    /// Share of the budget held back for exceptionally high-scoring fragments.
    #[serde(default = "default_reserved_ratio")]
    pub reserved_ratio: f64,

    /// Aspects whose presence is measured by the coverage metric.
    #[serde(default)]
    pub required_aspects: Vec<String>,

    /// Fragments older than this are stale. Unset disables the check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<u64>,

    /// Fragment-count ceiling before emergency trimming.
    #[serde(default = "default_max_fragments")]
    pub max_fragments: usize,

    /// Estimated memory ceiling before emergency trimming.
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    /// Budget used by callers that do not choose one.
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,

    /// Upper bound on sources collecting at the same time.
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// Per-source collection timeout. Unset waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timeout_secs: Option<u64>,

    #[serde(default)]
    pub dependency_ordering: DependencyOrdering,
}

fn default_min_relevance() -> f64 {
    0.3
}
fn default_reserved_ratio() -> f64 {
    0.15
}
fn default_max_fragments() -> usize {
    1000
}
fn default_max_memory_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_token_budget() -> usize {
    4096
}
fn default_max_concurrent_sources() -> usize {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_relevance: default_min_relevance(),
            reserved_ratio: default_reserved_ratio(),
            required_aspects: Vec::new(),
            max_age_secs: None,
            max_fragments: default_max_fragments(),
            max_memory_bytes: default_max_memory_bytes(),
            default_token_budget: default_token_budget(),
            max_concurrent_sources: default_max_concurrent_sources(),
            source_timeout_secs: None,
            dependency_ordering: DependencyOrdering::default(),
        }
    }
}

impl EngineConfig {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }

    pub fn source_timeout(&self) -> Option<Duration> {
        self.source_timeout_secs.map(Duration::from_secs)
    }

    /// Validate the engine settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_relevance) {
            return Err(ConfigError::ValidationError(
                "engine.min_relevance must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.reserved_ratio) {
            return Err(ConfigError::ValidationError(
                "engine.reserved_ratio must be in [0.0, 1.0)".into(),
            ));
        }
        if self.max_fragments < 2 {
            return Err(ConfigError::ValidationError(
                "engine.max_fragments must be at least 2".into(),
            ));
        }
        if self.max_memory_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_memory_bytes must be > 0".into(),
            ));
        }
        if self.default_token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "engine.default_token_budget must be > 0".into(),
            ));
        }
        if self.max_concurrent_sources == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_concurrent_sources must be > 0".into(),
            ));
        }
        if self.source_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "engine.source_timeout_secs must be > 0 when set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Largest file the file source will read, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,

    /// Directories the file source may read from. Empty = anywhere.
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    /// Path prefixes the file source must never read.
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,

    /// Include the environment source.
    #[serde(default = "default_true")]
    pub environment: bool,
}

fn default_max_file_bytes() -> usize {
    256 * 1024
}
fn default_forbidden_paths() -> Vec<String> {
    vec![
        "/etc/shadow".into(),
        "/proc".into(),
        "/sys".into(),
        "~/.ssh".into(),
        "~/.gnupg".into(),
        "~/.aws".into(),
    ]
}
fn default_true() -> bool {
    true
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_roots: Vec::new(),
            forbidden_paths: default_forbidden_paths(),
            environment: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Environment variables override the file:
    /// - `CONTEXTLOOM_MIN_RELEVANCE`
    /// - `CONTEXTLOOM_TOKEN_BUDGET`
    /// - `CONTEXTLOOM_MAX_FRAGMENTS`
    /// - `CONTEXTLOOM_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("CONTEXTLOOM_MIN_RELEVANCE") {
            self.engine.min_relevance = parse_env("CONTEXTLOOM_MIN_RELEVANCE", &raw)?;
        }
        if let Some(raw) = lookup("CONTEXTLOOM_TOKEN_BUDGET") {
            self.engine.default_token_budget = parse_env("CONTEXTLOOM_TOKEN_BUDGET", &raw)?;
        }
        if let Some(raw) = lookup("CONTEXTLOOM_MAX_FRAGMENTS") {
            self.engine.max_fragments = parse_env("CONTEXTLOOM_MAX_FRAGMENTS", &raw)?;
        }
        if let Some(level) = lookup("CONTEXTLOOM_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".contextloom")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.sources.max_file_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "sources.max_file_bytes must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::EnvError {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid value for {key}: {value:?}")]
    EnvError { key: String, value: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
