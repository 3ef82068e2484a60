//! ContextLoom CLI — the main entry point.
//!
//! Commands:
//! - `assemble` — Assemble context for a task and print it
//! - `config`   — Show, locate, validate, or initialize configuration

use clap::{Parser, Subcommand};
use contextloom_config::{AppConfig, LoggingConfig};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "contextloom",
    about = "ContextLoom — budgeted, task-aware context assembly",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.contextloom/config.toml
    #[arg(long, global = true, env = "CONTEXTLOOM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble context for a task
    Assemble(commands::assemble::AssembleArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Check the configuration for errors
    Validate,
    /// Write a default config file if none exists
    Init,
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, contextloom_config::ConfigError> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            Ok(config)
        }
        None => AppConfig::load(),
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Logs go to stderr so stdout stays clean for the assembled context.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            // `config validate` reports the error itself.
            if matches!(cli.command, Commands::Config { action: ConfigAction::Validate }) {
                AppConfig::default()
            } else {
                return Err(e.into());
            }
        }
    };
    init_tracing(&config.logging, cli.verbose);

    match cli.command {
        Commands::Assemble(args) => commands::assemble::run(args, config).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config)?,
            ConfigAction::Path => commands::config_cmd::path(cli.config.as_deref())?,
            ConfigAction::Validate => commands::config_cmd::validate(cli.config.as_deref())?,
            ConfigAction::Init => commands::config_cmd::init(cli.config.as_deref())?,
        },
    }

    Ok(())
}
