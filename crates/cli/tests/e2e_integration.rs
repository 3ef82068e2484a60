//! End-to-end integration tests for the ContextLoom assembly pipeline.
//!
//! These tests run the engine over the built-in sources and over scripted
//! sources, from request to rendered package.

use std::io;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use contextloom_config::{AppConfig, EngineConfig, SourcesConfig};
use contextloom_core::error::SourceError;
use contextloom_core::experience::{ExperienceNote, ExperienceStore};
use contextloom_core::fragment::{Fragment, FragmentKind};
use contextloom_core::package::PackageStatus;
use contextloom_core::request::{Request, Scope, TaskType};
use contextloom_core::source::{ContextSource, SourceRegistry};
use contextloom_engine::{ContextEngine, ResourceBounds, rule};
use contextloom_sources::{FILES_PARAM, InMemoryExperienceStore, StaticSource, default_registry};
use tracing_subscriber::fmt::MakeWriter;

// ── Scripted Sources ─────────────────────────────────────────────────────

/// Emits one fragment with a fixed id, relevance and size.
struct ScriptedSource {
    name: String,
    fragment: Fragment,
}

impl ScriptedSource {
    fn new(name: &str, kind: FragmentKind, content: &str, relevance: f64) -> Arc<dyn ContextSource> {
        Arc::new(Self {
            name: name.into(),
            fragment: Fragment::builder(name, kind, content)
                .id(name)
                .relevance(relevance)
                .build(),
        })
    }
}

#[async_trait::async_trait]
impl ContextSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
        Ok(Some(self.fragment.clone()))
    }

    fn estimated_cost(&self) -> usize {
        self.fragment.estimated_size
    }
}

/// Always fails to collect.
struct BrokenSource;

#[async_trait::async_trait]
impl ContextSource for BrokenSource {
    fn name(&self) -> &str {
        "broken"
    }

    fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
        Ok(true)
    }

    async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
        Err(SourceError::CollectionFailed {
            source_name: "broken".into(),
            reason: "upstream unavailable".into(),
        })
    }
}

/// Captures formatted log output.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn engine_over(config: EngineConfig, sources: Vec<Arc<dyn ContextSource>>) -> ContextEngine {
    let registry = Arc::new(SourceRegistry::new());
    for source in sources {
        registry.register(source);
    }
    ContextEngine::new(config, registry).unwrap()
}

// ── E2E: Built-in Sources ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_files_and_task_render_in_bug_fixing_order() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("handler.rs");
    std::fs::write(&file, "fn handle() { panic!(\"boom\") }\n").unwrap();

    let config = AppConfig::default();
    let registry = Arc::new(default_registry(&config.sources, None));
    registry.register(Arc::new(
        StaticSource::new("crash-log", FragmentKind::RuntimeErrors, "thread 'main' panicked at 'boom'").relevance(0.9),
    ));
    let engine = ContextEngine::new(config.engine.clone(), registry).unwrap();

    let request = engine
        .request("fix the panic in handle")
        .task_type(TaskType::BugFixing)
        .parameter(FILES_PARAM, file.to_string_lossy())
        .build();
    let result = engine.assemble(&request).await;

    assert_eq!(result.package.status(), PackageStatus::Ok);
    let titles: Vec<&str> = result.package.sections.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles[0], "Runtime Errors");
    assert_eq!(titles[1], "Implementation");
    assert!(titles.contains(&"Task Description"));
    assert!(titles.contains(&"Environment"));

    let rendered = result.package.render();
    assert!(rendered.starts_with("# Context for: fix the panic in handle\n\n## Runtime Errors\n"));
    assert!(rendered.contains("### From files\n"));
    assert!(rendered.contains("fn handle()"));
    assert!(result.metrics.total_size <= request.token_budget);
}

#[tokio::test]
async fn e2e_small_budget_still_reads_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.rs");
    std::fs::write(&file, "fn a() {}\n").unwrap();

    let config = AppConfig::default();
    let engine = ContextEngine::new(
        config.engine.clone(),
        Arc::new(default_registry(&config.sources, None)),
    )
    .unwrap();

    let request = Request::builder("small")
        .token_budget(80)
        .parameter(FILES_PARAM, file.to_string_lossy())
        .build();
    let result = engine.assemble(&request).await;

    let sources: Vec<&str> = result.package.fragments.iter().map(|f| f.source.as_str()).collect();
    assert!(sources.contains(&"files"), "selected: {sources:?}");
    assert!(sources.contains(&"task"));
    assert!(result.package.render().contains("fn a() {}"));
    assert!(result.metrics.total_size <= 80);
}

#[tokio::test]
async fn e2e_experience_notes_reach_the_package() {
    let store = InMemoryExperienceStore::new();
    store
        .record(ExperienceNote {
            id: String::new(),
            content: "Retry idempotent requests with exponential backoff".into(),
            tags: vec!["reliability".into()],
            rating: 0.9,
            recorded_at: Utc::now(),
            score: 0.0,
        })
        .await
        .unwrap();
    let store: Arc<dyn ExperienceStore> = Arc::new(store);

    let sources = SourcesConfig {
        environment: false,
        ..SourcesConfig::default()
    };
    let config = EngineConfig {
        min_relevance: 0.1,
        required_aspects: vec!["reliability".into()],
        ..EngineConfig::default()
    };
    let engine = ContextEngine::new(config, Arc::new(default_registry(&sources, Some(store)))).unwrap();

    let request = Request::builder("add retry with backoff to the http client")
        .task_type(TaskType::CodeGeneration)
        .focus("reliability")
        .build();
    let result = engine.assemble(&request).await;

    assert!(result.package.fragments.iter().any(|f| f.kind == FragmentKind::Experience));
    assert!(result.package.render().contains("## Experience"));
    assert_eq!(result.metrics.coverage, 1.0);
}

#[tokio::test]
async fn e2e_forbidden_file_is_not_read() {
    let dir = tempfile::tempdir().unwrap();
    let secret = dir.path().join("id_ed25519");
    std::fs::write(&secret, "PRIVATE KEY").unwrap();

    let sources = SourcesConfig {
        forbidden_paths: vec![dir.path().canonicalize().unwrap().to_string_lossy().into_owned()],
        environment: false,
        ..SourcesConfig::default()
    };
    let engine = ContextEngine::new(EngineConfig::default(), Arc::new(default_registry(&sources, None))).unwrap();

    let request = Request::builder("explain this key")
        .parameter(FILES_PARAM, secret.to_string_lossy())
        .build();
    let result = engine.assemble(&request).await;

    assert_eq!(result.package.status(), PackageStatus::Ok);
    assert!(!result.package.render().contains("PRIVATE KEY"));
    assert!(result.package.fragments.iter().all(|f| f.source != "files"));
}

// ── E2E: Failure Isolation ───────────────────────────────────────────────

#[tokio::test]
async fn e2e_failing_source_does_not_block_others() {
    let engine = engine_over(
        EngineConfig::default(),
        vec![
            Arc::new(BrokenSource) as Arc<dyn ContextSource>,
            ScriptedSource::new("docs", FragmentKind::Documentation, "The API returns JSON.", 0.7),
        ],
    );

    let result = engine.assemble(&Request::builder("document the API").build()).await;
    assert_eq!(result.package.status(), PackageStatus::Ok);
    assert_eq!(result.package.fragments.len(), 1);
    assert_eq!(result.package.fragments[0].source, "docs");
}

#[tokio::test]
async fn e2e_invalid_request_yields_error_package() {
    let engine = engine_over(
        EngineConfig::default(),
        vec![ScriptedSource::new("docs", FragmentKind::Documentation, "text", 0.7)],
    );

    let result = engine.assemble(&Request::builder("   ").build()).await;
    assert!(result.package.is_error());
    assert!(result.package.sections.is_empty());
    assert_eq!(result.metrics.fragment_count, 0);
}

#[tokio::test]
async fn e2e_custom_rule_and_exclusions() {
    let registry = Arc::new(SourceRegistry::new());
    registry.register(ScriptedSource::new("logs", FragmentKind::Logs, "GET /health 200", 0.9));
    registry.register(ScriptedSource::new("todo", FragmentKind::Implementation, "// TODO remove", 0.9));
    registry.register(ScriptedSource::new("code", FragmentKind::Implementation, "fn ok() {}", 0.9));
    let engine = ContextEngine::builder(EngineConfig::default())
        .registry(registry)
        .rule(rule("no_todo", |f: &Fragment, _: &Request| !f.content.contains("TODO")))
        .build()
        .unwrap();

    let request = Request::builder("review").exclude(FragmentKind::Logs).build();
    let result = engine.assemble(&request).await;

    let ids: Vec<&str> = result.package.fragments.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["code"]);
    assert_eq!(result.package.metadata["fragments_after_filter"], "1");
}

// ── E2E: Budget and Resource Pressure ────────────────────────────────────

#[tokio::test]
async fn e2e_budget_is_never_exceeded() {
    let sources: Vec<Arc<dyn ContextSource>> = (0..40)
        .map(|i| {
            ScriptedSource::new(
                &format!("s{i}"),
                FragmentKind::Implementation,
                &"x".repeat(40 + i * 7),
                0.3 + (i % 7) as f64 / 10.0,
            )
        })
        .collect();
    let engine = engine_over(EngineConfig::default(), sources);

    for budget in [1, 25, 100, 333, 1000] {
        let result = engine
            .assemble(&Request::builder("t").token_budget(budget).scope(Scope::Minimal).build())
            .await;
        assert!(result.metrics.total_size <= budget, "budget {budget} exceeded");
        assert_eq!(result.package.estimated_size, result.metrics.total_size);
        if budget >= 25 {
            assert!(result.metrics.fragment_count > 0, "budget {budget} selected nothing");
        }
    }
}

#[tokio::test]
async fn e2e_over_ceiling_trims_to_half_and_logs() {
    let sources: Vec<Arc<dyn ContextSource>> = (0..1500)
        .map(|i| {
            ScriptedSource::new(
                &format!("s{i:04}"),
                FragmentKind::Logs,
                &format!("event {i}"),
                (i % 100) as f64 / 100.0,
            )
        })
        .collect();
    let config = EngineConfig {
        max_fragments: 1000,
        min_relevance: 0.0,
        ..EngineConfig::default()
    };
    let engine = engine_over(config, sources);

    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let result = engine.assemble(&Request::builder("summarize events").build()).await;

    assert!(result.package.is_degraded());
    assert_eq!(result.package.metadata["fragments_collected"], "1500");
    assert_eq!(result.package.metadata["fragments_after_bounds"], "500");
    assert!(result.package.fragments.iter().all(|f| f.relevance >= 0.66));
    assert!(capture.contents().contains("Context degraded"));
}

#[test]
fn e2e_tied_trim_is_reproducible() {
    let fragments: Vec<Fragment> = (0..1500)
        .map(|i| {
            Fragment::builder("s", FragmentKind::Logs, format!("event {i}"))
                .id(format!("f{i}"))
                .relevance(0.5)
                .build()
        })
        .collect();
    let bounds = ResourceBounds::new(1000, usize::MAX);

    let first = bounds.enforce(fragments.clone());
    let second = bounds.enforce(fragments);
    assert_eq!(first.fragments.len(), 500);
    assert_eq!(first.fragments, second.fragments);
    assert_eq!(first.fragments[0].id, "f0");
    assert_eq!(first.fragments[499].id, "f499");
}

// ── E2E: Output ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_package_serializes_and_templates() {
    let engine = engine_over(
        EngineConfig::default(),
        vec![ScriptedSource::new("docs", FragmentKind::Documentation, "Usage notes.", 0.8)],
    );
    let result = engine
        .assemble(&Request::builder("explain usage").task_type(TaskType::Explanation).build())
        .await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["package"]["metadata"]["status"], "ok");
    assert_eq!(json["package"]["task_type"], "explanation");
    assert_eq!(json["metrics"]["fragment_count"], 1);

    let templated = result.package.render_template("<{task_type}> {task}\n{sections}");
    assert!(templated.starts_with("<explanation> explain usage\n## Documentation\n"));
}
