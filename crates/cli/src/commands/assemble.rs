//! `contextloom assemble` — Build a context package for one task.

use clap::Args;
use contextloom_config::AppConfig;
use contextloom_core::experience::{ExperienceNote, ExperienceStore};
use contextloom_core::fragment::FragmentKind;
use contextloom_core::request::{Request, Scope, TaskType};
use contextloom_engine::ContextEngine;
use contextloom_sources::{FILES_PARAM, InMemoryExperienceStore, default_registry};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct AssembleArgs {
    /// What the downstream model is asked to do
    #[arg(short, long)]
    pub task: String,

    /// Task type; drives section ordering
    #[arg(long, default_value = "general")]
    pub task_type: TaskType,

    /// Size budget in estimated tokens (defaults to engine.default_token_budget)
    #[arg(short, long)]
    pub budget: Option<usize>,

    /// Focus area; repeatable
    #[arg(long)]
    pub focus: Vec<String>,

    /// Fragment kind to favor; repeatable
    #[arg(long)]
    pub prefer: Vec<FragmentKind>,

    /// Fragment kind to leave out; repeatable
    #[arg(long)]
    pub exclude: Vec<FragmentKind>,

    #[arg(long, default_value = "module")]
    pub scope: Scope,

    /// File to include; repeatable
    #[arg(short, long)]
    pub file: Vec<String>,

    /// Extra source parameter as KEY=VALUE; repeatable
    #[arg(long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// JSON file of experience notes to consult
    #[arg(long)]
    pub experience: Option<PathBuf>,

    /// Render through a template with {task}, {task_type} and {sections}
    #[arg(long)]
    pub template: Option<String>,

    /// Print the package and metrics as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Turn CLI arguments into a request.
pub(crate) fn build_request(args: &AssembleArgs, default_budget: usize) -> Request {
    let mut builder = Request::builder(args.task.clone())
        .task_type(args.task_type)
        .token_budget(args.budget.unwrap_or(default_budget))
        .focus_areas(args.focus.iter().cloned())
        .scope(args.scope);
    for kind in &args.prefer {
        builder = builder.prefer(*kind);
    }
    for kind in &args.exclude {
        builder = builder.exclude(*kind);
    }
    for (key, value) in &args.params {
        builder = builder.parameter(key.clone(), value.clone());
    }
    if !args.file.is_empty() {
        builder = builder.parameter(FILES_PARAM, args.file.join(","));
    }
    builder.build()
}

async fn load_experience(path: &Path) -> Result<Arc<dyn ExperienceStore>, Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read experience file {}: {e}", path.display()))?;
    let notes: Vec<ExperienceNote> = serde_json::from_str(&raw)?;

    let store = InMemoryExperienceStore::new();
    for note in notes {
        store.record(note).await?;
    }
    tracing::debug!(notes = store.count().await?, "Loaded experience notes");
    Ok(Arc::new(store))
}

pub async fn run(args: AssembleArgs, config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = match &args.experience {
        Some(path) => Some(load_experience(path).await?),
        None => None,
    };

    let registry = Arc::new(default_registry(&config.sources, store));
    let engine = ContextEngine::new(config.engine.clone(), registry)?;
    let request = build_request(&args, config.engine.default_token_budget);

    let result = engine.assemble(&request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let rendered = match &args.template {
            Some(template) => result.package.render_template(template),
            None => result.package.render(),
        };
        print!("{rendered}");

        let metrics = result.metrics.rounded();
        eprintln!(
            "{} fragment(s), {} / {} tokens, mean relevance {}, coverage {}",
            metrics.fragment_count, metrics.total_size, request.token_budget, metrics.mean_relevance, metrics.coverage
        );
    }

    if result.package.is_error() {
        let message = result
            .package
            .metadata
            .get(contextloom_core::package::MESSAGE_KEY)
            .cloned()
            .unwrap_or_else(|| "assembly failed".into());
        return Err(message.into());
    }
    Ok(())
}
