//! `contextloom config` — Configuration management commands.

use contextloom_config::AppConfig;
use std::path::{Path, PathBuf};

fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

pub fn validate(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    println!("Validating {}", path.display());

    let mut config = AppConfig::load_from(&path).map_err(|e| {
        println!("  error: {e}");
        e
    })?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate().map_err(|e| {
        println!("  error: {e}");
        e
    })?;

    let mut warnings = Vec::new();
    if config.engine.min_relevance > 0.9 {
        warnings.push("engine.min_relevance above 0.9 filters out almost everything");
    }
    if config.engine.reserved_ratio > 0.5 {
        warnings.push("engine.reserved_ratio above 0.5 leaves little budget for ordinary fragments");
    }
    if config.engine.source_timeout_secs.is_none() {
        warnings.push("no engine.source_timeout_secs: a hung source blocks its request");
    }

    println!("  ok");
    for w in &warnings {
        println!("  warning: {w}");
    }

    println!();
    println!("  Min relevance:   {}", config.engine.min_relevance);
    println!("  Reserved ratio:  {}", config.engine.reserved_ratio);
    println!("  Default budget:  {}", config.engine.default_token_budget);
    println!("  Max fragments:   {}", config.engine.max_fragments);
    println!("  Dependencies:    {:?}", config.engine.dependency_ordering);
    Ok(())
}

pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path(explicit).display());
    Ok(())
}

pub fn init(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
