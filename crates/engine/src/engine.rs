//! The assembly engine — orchestrates collection and the pipeline stages.
//!
//! A request moves through
//! `received → collecting → bounding → filtering → prioritizing → formatting → done`,
//! or ends in `failed`. Sources run concurrently on a bounded pool; each one
//! is isolated, so an error, panic, or timeout only loses that source's
//! fragment. Everything after collection is synchronous. `assemble` never
//! returns an error: failures come back as flagged packages.

use chrono::{DateTime, Utc};
use contextloom_config::{ConfigError, EngineConfig};
use contextloom_core::error::{Error, SourceError};
use contextloom_core::fragment::Fragment;
use contextloom_core::package::{DEGRADED_KEY, Metrics, Package};
use contextloom_core::request::{Request, RequestBuilder};
use contextloom_core::source::{ContextSource, SourceRegistry};
use futures::FutureExt;
use serde::Serialize;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::bounds::ResourceBounds;
use crate::filter::{FilterRule, FilterStage};
use crate::format::FormatStage;
use crate::panic_message;
use crate::priority::PriorityStage;

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    Received,
    Collecting,
    Bounding,
    Filtering,
    Prioritizing,
    Formatting,
    Done,
    Failed,
}

impl AssemblyStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Collecting => "collecting",
            Self::Bounding => "bounding",
            Self::Filtering => "filtering",
            Self::Prioritizing => "prioritizing",
            Self::Formatting => "formatting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `assemble` hands back: the package plus quality metrics over it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyResult {
    pub package: Package,
    pub metrics: Metrics,
}

/// Builder for [`ContextEngine`].
pub struct ContextEngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<SourceRegistry>>,
    rules: Vec<Arc<dyn FilterRule>>,
}

impl ContextEngineBuilder {
    /// Share an existing registry instead of starting with an empty one.
    pub fn registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a custom filter rule.
    pub fn rule(mut self, rule: Arc<dyn FilterRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = Arc<dyn FilterRule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<ContextEngine, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let filter = FilterStage::new(config.min_relevance, config.max_age()).with_rules(self.rules);
        let priority = PriorityStage::new(config.reserved_ratio, config.dependency_ordering);
        let bounds = ResourceBounds::new(config.max_fragments, config.max_memory_bytes);
        let pool = Arc::new(Semaphore::new(config.max_concurrent_sources));

        info!(
            min_relevance = config.min_relevance,
            reserved_ratio = config.reserved_ratio,
            max_fragments = config.max_fragments,
            max_concurrent_sources = config.max_concurrent_sources,
            rules = filter.rule_names().len(),
            "Context engine ready"
        );

        Ok(ContextEngine {
            registry: self.registry.unwrap_or_default(),
            filter,
            priority,
            format: FormatStage::new(),
            bounds,
            pool,
            config,
            #[cfg(test)]
            fault: None,
        })
    }
}

/// Assembles context packages from the sources in its registry.
///
/// Configuration is fixed at construction. The registry is shared and may
/// change at any time; each request works on a snapshot taken when
/// collection starts.
pub struct ContextEngine {
    config: EngineConfig,
    registry: Arc<SourceRegistry>,
    bounds: ResourceBounds,
    filter: FilterStage,
    priority: PriorityStage,
    format: FormatStage,
    pool: Arc<Semaphore>,
    /// Stage that panics on entry.
    #[cfg(test)]
    fault: Option<AssemblyStage>,
}

impl ContextEngine {
    pub fn builder(config: EngineConfig) -> ContextEngineBuilder {
        ContextEngineBuilder {
            config,
            registry: None,
            rules: Vec::new(),
        }
    }

    /// An engine over `registry` with no custom rules.
    pub fn new(config: EngineConfig, registry: Arc<SourceRegistry>) -> Result<Self, ConfigError> {
        Self::builder(config).registry(registry).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Start a request that uses the configured default budget.
    pub fn request(&self, task_description: impl Into<String>) -> RequestBuilder {
        Request::builder(task_description).token_budget(self.config.default_token_budget)
    }

    /// Assemble a package for `request`.
    pub async fn assemble(&self, request: &Request) -> AssemblyResult {
        let span = info_span!(
            "assemble",
            task_type = %request.task_type,
            budget = request.token_budget
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &Request) -> AssemblyResult {
        transition(AssemblyStage::Received);
        if let Err(e) = request.validate() {
            return self.failed(request, AssemblyStage::Received, e.to_string());
        }
        let now = Utc::now();

        transition(AssemblyStage::Collecting);
        let sources = self.applicable_sources(request);
        if sources.is_empty() {
            info!("No applicable sources, returning an empty package");
            let package = Package::empty(request, "no applicable sources");
            let metrics = Metrics::compute(&package.fragments, &self.config.required_aspects);
            return AssemblyResult { package, metrics };
        }
        let sources_applicable = sources.len();
        let collected = self.collect(sources, request).await;

        let stage = Cell::new(AssemblyStage::Bounding);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.process(collected, request, now, sources_applicable, &stage)
        }));

        match outcome {
            Ok(Ok(result)) => {
                transition(AssemblyStage::Done);
                info!(
                    fragments = result.metrics.fragment_count,
                    size = result.metrics.total_size,
                    "Context assembled"
                );
                result
            }
            Ok(Err(e)) => self.failed(request, stage.get(), e.to_string()),
            Err(panic) => self.failed(
                request,
                stage.get(),
                format!("stage panicked: {}", panic_message(&panic)),
            ),
        }
    }

    /// Snapshot the registry and keep the sources that apply to `request`.
    ///
    /// A failing or panicking applicability check counts as "not applicable".
    /// Sources whose declared cost exceeds the whole budget are skipped.
    fn applicable_sources(&self, request: &Request) -> Vec<Arc<dyn ContextSource>> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|source| {
                let name = source.name();
                match catch_unwind(AssertUnwindSafe(|| source.is_applicable(request))) {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => return false,
                    Ok(Err(e)) => {
                        warn!(source = %name, error = %e, "Applicability check failed, skipping source");
                        return false;
                    }
                    Err(panic) => {
                        warn!(source = %name, panic = %panic_message(&panic), "Applicability check panicked, skipping source");
                        return false;
                    }
                }

                let cost = source.estimated_cost();
                if cost > request.token_budget {
                    info!(source = %name, cost, budget = request.token_budget, "Source too costly for budget, skipping");
                    return false;
                }
                true
            })
            .collect()
    }

    /// Run every source as its own task and wait for all of them.
    ///
    /// Fragments come back ordered by source priority, highest first, and by
    /// completion order within a priority.
    async fn collect(&self, sources: Vec<Arc<dyn ContextSource>>, request: &Request) -> Vec<Fragment> {
        let request = Arc::new(request.clone());
        let timeout = self.config.source_timeout();
        let mut tasks = JoinSet::new();

        for source in sources {
            let request = Arc::clone(&request);
            let pool = Arc::clone(&self.pool);
            tasks.spawn(async move {
                let name = source.name().to_string();
                let priority = source.priority();
                let outcome = collect_one(source, &name, &request, pool, timeout).await;
                (name, priority, outcome)
            });
        }

        let mut collected: Vec<(u8, Fragment)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, priority, Ok(Some(fragment)))) => {
                    collected.push((priority, admit(fragment, &name)));
                }
                Ok((name, _, Ok(None))) => {
                    debug!(source = %name, "Source contributed nothing");
                }
                Ok((name, _, Err(e))) => {
                    warn!(source = %name, error = %e, "Source failed, continuing without it");
                }
                Err(e) if e.is_panic() => {
                    warn!(panic = %panic_message(&e.into_panic()), "Source task panicked, continuing without it");
                }
                Err(e) => {
                    warn!(error = %e, "Source task did not complete, continuing without it");
                }
            }
        }

        collected.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(collected = collected.len(), "Collection complete");
        collected.into_iter().map(|(_, fragment)| fragment).collect()
    }

    /// Bounding through formatting. `stage` tracks progress so a failure can
    /// be attributed.
    fn process(
        &self,
        collected: Vec<Fragment>,
        request: &Request,
        now: DateTime<Utc>,
        sources_applicable: usize,
        stage: &Cell<AssemblyStage>,
    ) -> Result<AssemblyResult, Error> {
        let fragments_collected = collected.len();

        self.enter(stage, AssemblyStage::Bounding);
        let bounded = self.bounds.enforce(collected);
        let after_bounds = bounded.fragments.len();

        self.enter(stage, AssemblyStage::Filtering);
        let filtered = self.filter.apply(bounded.fragments, request, now);
        let after_filter = filtered.len();

        self.enter(stage, AssemblyStage::Prioritizing);
        let selected = self.priority.prioritize(filtered, request, now);

        self.enter(stage, AssemblyStage::Formatting);
        let sections = self.format.format(&selected, request)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("sources_applicable".to_string(), sources_applicable.to_string());
        metadata.insert("fragments_collected".to_string(), fragments_collected.to_string());
        metadata.insert("fragments_after_bounds".to_string(), after_bounds.to_string());
        metadata.insert("fragments_after_filter".to_string(), after_filter.to_string());
        metadata.insert("fragments_selected".to_string(), selected.len().to_string());
        metadata.insert(DEGRADED_KEY.to_string(), bounded.degraded.to_string());

        let package = Package::new(request, sections, selected, metadata);
        let metrics = Metrics::compute(&package.fragments, &self.config.required_aspects);
        Ok(AssemblyResult { package, metrics })
    }

    fn enter(&self, cell: &Cell<AssemblyStage>, stage: AssemblyStage) {
        cell.set(stage);
        transition(stage);
        #[cfg(test)]
        if self.fault == Some(stage) {
            panic!("fault injected into {stage}");
        }
    }

    fn failed(&self, request: &Request, stage: AssemblyStage, message: String) -> AssemblyResult {
        warn!(stage = %stage, error = %message, "Assembly failed");
        transition(AssemblyStage::Failed);
        let package = Package::error(request, stage.as_str(), message);
        let metrics = Metrics::compute(&package.fragments, &self.config.required_aspects);
        AssemblyResult { package, metrics }
    }
}

/// Collect from one source under a pool permit, with panic isolation and
/// an optional timeout.
async fn collect_one(
    source: Arc<dyn ContextSource>,
    name: &str,
    request: &Request,
    pool: Arc<Semaphore>,
    timeout: Option<Duration>,
) -> Result<Option<Fragment>, SourceError> {
    let _permit = pool
        .acquire_owned()
        .await
        .map_err(|_| SourceError::CollectionFailed {
            source_name: name.to_string(),
            reason: "collection pool closed".into(),
        })?;

    let collect = AssertUnwindSafe(source.collect(request)).catch_unwind();
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, collect)
            .await
            .map_err(|_| SourceError::Timeout {
                source_name: name.to_string(),
                timeout_secs: limit.as_secs(),
            })?,
        None => collect.await,
    };

    outcome.unwrap_or_else(|panic| {
        Err(SourceError::Panicked {
            source_name: name.to_string(),
            message: panic_message(&panic),
        })
    })
}

/// Attribute an unnamed fragment to its source and pull relevance back into
/// [0.0, 1.0].
fn admit(fragment: Fragment, source: &str) -> Fragment {
    let fragment = if fragment.source.is_empty() {
        fragment.with_source(source)
    } else {
        fragment
    };
    if fragment.relevance_in_range() {
        return fragment;
    }
    warn!(source = %source, relevance = fragment.relevance, "Relevance out of range, clamping");
    fragment.with_relevance(fragment.relevance)
}

fn transition(stage: AssemblyStage) {
    debug!(stage = %stage, "Assembly stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use contextloom_config::DependencyOrdering;
    use contextloom_core::fragment::FragmentKind;
    use contextloom_core::package::{FAILED_STAGE_KEY, MESSAGE_KEY, PackageStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed fragment.
    struct FixedSource {
        name: String,
        fragment: Fragment,
        priority: u8,
    }

    #[async_trait]
    impl ContextSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
            Ok(true)
        }
        async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
            Ok(Some(self.fragment.clone()))
        }
        fn priority(&self) -> u8 {
            self.priority
        }
    }

    enum Misbehavior {
        CollectError,
        CollectPanic,
        ApplicabilityError,
        ApplicabilityPanic,
        Hang,
        Expensive,
    }

    struct BadSource {
        name: String,
        mode: Misbehavior,
    }

    #[async_trait]
    impl ContextSource for BadSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
            match self.mode {
                Misbehavior::ApplicabilityError => Err(SourceError::ApplicabilityFailed {
                    source_name: self.name.clone(),
                    reason: "broken".into(),
                }),
                Misbehavior::ApplicabilityPanic => panic!("applicability exploded"),
                _ => Ok(true),
            }
        }
        async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
            match self.mode {
                Misbehavior::CollectError => Err(SourceError::CollectionFailed {
                    source_name: self.name.clone(),
                    reason: "backend down".into(),
                }),
                Misbehavior::CollectPanic => panic!("collect exploded"),
                Misbehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                }
                _ => Ok(Some(
                    Fragment::builder(&self.name, FragmentKind::Logs, "should not appear").build(),
                )),
            }
        }
        fn estimated_cost(&self) -> usize {
            match self.mode {
                Misbehavior::Expensive => usize::MAX,
                _ => 1,
            }
        }
    }

    /// Counts how often it is collected.
    struct CountingSource {
        name: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContextSource for CountingSource {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_applicable(&self, _request: &Request) -> Result<bool, SourceError> {
            Ok(true)
        }
        async fn collect(&self, _request: &Request) -> Result<Option<Fragment>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(
                Fragment::builder(&self.name, FragmentKind::Implementation, format!("from {}", self.name))
                    .relevance(0.6)
                    .build(),
            ))
        }
    }

    fn fixed(name: &str, kind: FragmentKind, content: &str, relevance: f64) -> Arc<dyn ContextSource> {
        Arc::new(FixedSource {
            name: name.into(),
            fragment: Fragment::builder(name, kind, content)
                .id(name)
                .relevance(relevance)
                .build(),
            priority: 50,
        })
    }

    fn serving(fragment: Fragment, priority: u8) -> Arc<dyn ContextSource> {
        Arc::new(FixedSource {
            name: fragment.source.clone(),
            fragment,
            priority,
        })
    }

    fn bad(name: &str, mode: Misbehavior) -> Arc<dyn ContextSource> {
        Arc::new(BadSource {
            name: name.into(),
            mode,
        })
    }

    fn engine_with(config: EngineConfig, sources: Vec<Arc<dyn ContextSource>>) -> ContextEngine {
        let registry = Arc::new(SourceRegistry::new());
        for source in sources {
            registry.register(source);
        }
        ContextEngine::new(config, registry).unwrap()
    }

    fn engine(sources: Vec<Arc<dyn ContextSource>>) -> ContextEngine {
        engine_with(EngineConfig::default(), sources)
    }

    fn selected_ids(result: &AssemblyResult) -> Vec<&str> {
        result.package.fragments.iter().map(|f| f.id.as_str()).collect()
    }

    #[tokio::test]
    async fn assembles_from_applicable_sources() {
        let engine = engine(vec![
            fixed("code", FragmentKind::Implementation, "fn main() {}", 0.9),
            fixed("errors", FragmentKind::RuntimeErrors, "panicked at main.rs:1", 0.8),
        ]);
        let req = Request::builder("fix the crash")
            .task_type(contextloom_core::request::TaskType::BugFixing)
            .build();

        let result = engine.assemble(&req).await;
        assert_eq!(result.package.status(), PackageStatus::Ok);
        assert_eq!(result.package.fragments.len(), 2);
        assert_eq!(result.package.sections[0].title, "Runtime Errors");
        assert_eq!(result.metrics.fragment_count, 2);
        assert_eq!(result.package.metadata["sources_applicable"], "2");
        assert_eq!(result.package.metadata["degraded"], "false");
        assert!(result.package.render().starts_with("# Context for: fix the crash"));
    }

    #[tokio::test]
    async fn zero_budget_selects_nothing() {
        let engine = engine(vec![fixed("code", FragmentKind::Implementation, "fn a() {}", 0.9)]);
        let req = Request::builder("t").token_budget(0).build();

        let result = engine.assemble(&req).await;
        assert!(result.package.fragments.is_empty());
        assert!(result.package.is_error());
        assert_eq!(result.package.metadata[FAILED_STAGE_KEY], "received");
    }

    #[tokio::test]
    async fn duplicate_content_across_sources_kept_once() {
        let engine = engine(vec![
            fixed("a", FragmentKind::Documentation, "same text", 0.7),
            fixed("b", FragmentKind::Documentation, "same text", 0.7),
        ]);
        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(result.package.fragments.len(), 1);
    }

    #[tokio::test]
    async fn high_relevance_fragment_uses_reserved_slice() {
        // budget 100, reserved 15, available 85; a 90-unit fragment only fits the full budget.
        let big = Fragment::builder("big", FragmentKind::Implementation, "x")
            .id("big")
            .relevance(0.9)
            .aspect("core")
            .estimated_size(90)
            .build();
        let engine = engine(vec![serving(big, 50)]);
        let req = Request::builder("t")
            .token_budget(100)
            .prefer(FragmentKind::Implementation)
            .focus("core")
            .build();

        let result = engine.assemble(&req).await;
        assert_eq!(selected_ids(&result), vec!["big"]);
        assert_eq!(result.metrics.total_size, 90);
    }

    #[tokio::test]
    async fn failing_sources_do_not_fail_assembly() {
        let engine = engine(vec![
            bad("errs", Misbehavior::CollectError),
            bad("panics", Misbehavior::CollectPanic),
            bad("check-errs", Misbehavior::ApplicabilityError),
            bad("check-panics", Misbehavior::ApplicabilityPanic),
            bad("pricey", Misbehavior::Expensive),
            fixed("good", FragmentKind::Implementation, "fn good() {}", 0.8),
        ]);

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(result.package.status(), PackageStatus::Ok);
        assert_eq!(selected_ids(&result), vec!["good"]);
        assert_eq!(result.package.metadata["sources_applicable"], "3");
    }

    #[tokio::test]
    async fn no_applicable_sources_gives_empty_package() {
        let engine = engine(vec![bad("check-errs", Misbehavior::ApplicabilityError)]);
        let result = engine.assemble(&Request::builder("t").build()).await;
        assert!(result.package.is_empty_result());
        assert!(!result.package.is_error());
        assert!(result.package.fragments.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_drops_hung_source() {
        let config = EngineConfig {
            source_timeout_secs: Some(1),
            ..EngineConfig::default()
        };
        let engine = engine_with(
            config,
            vec![
                bad("hangs", Misbehavior::Hang),
                fixed("good", FragmentKind::Implementation, "fn good() {}", 0.8),
            ],
        );

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(selected_ids(&result), vec!["good"]);
    }

    #[tokio::test]
    async fn over_ceiling_trims_and_flags_degraded() {
        let config = EngineConfig {
            max_fragments: 4,
            min_relevance: 0.0,
            ..EngineConfig::default()
        };
        let sources = (0..6)
            .map(|i| fixed(&format!("s{i}"), FragmentKind::Logs, &format!("line {i}"), 0.5 + i as f64 / 100.0))
            .collect();
        let engine = engine_with(config, sources);

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert!(result.package.is_degraded());
        assert_eq!(result.package.metadata["fragments_collected"], "6");
        assert_eq!(result.package.metadata["fragments_after_bounds"], "2");
        let mut ids = selected_ids(&result);
        ids.sort();
        assert_eq!(ids, vec!["s4", "s5"]);
    }

    #[tokio::test]
    async fn custom_rule_failure_is_not_fatal() {
        let registry = Arc::new(SourceRegistry::new());
        registry.register(fixed("a", FragmentKind::Implementation, "keep me", 0.8));
        registry.register(fixed("b", FragmentKind::Implementation, "explode", 0.8));
        let engine = ContextEngine::builder(EngineConfig::default())
            .registry(registry)
            .rule(crate::filter::rule("explodes", |f: &Fragment, _: &Request| {
                if f.content == "explode" {
                    panic!("rule blew up");
                }
                true
            }))
            .build()
            .unwrap();

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(result.package.status(), PackageStatus::Ok);
        assert_eq!(selected_ids(&result), vec!["a"]);
    }

    #[tokio::test]
    async fn higher_priority_source_wins_score_ties() {
        let now = Utc::now();
        let make = |name: &str, priority: u8| -> Arc<dyn ContextSource> {
            Arc::new(FixedSource {
                name: name.into(),
                fragment: Fragment::builder(name, FragmentKind::Implementation, format!("from {name}"))
                    .id(name)
                    .relevance(0.7)
                    .estimated_size(60)
                    .timestamp(now)
                    .build(),
                priority,
            })
        };
        let engine = engine(vec![make("low", 10), make("high", 90)]);
        let req = Request::builder("t").token_budget(100).build();

        let result = engine.assemble(&req).await;
        assert_eq!(selected_ids(&result), vec!["high"]);
    }

    #[tokio::test]
    async fn topological_ordering_admits_lower_ranked_dependency() {
        let now = Utc::now();
        let dependent = Fragment::builder("api", FragmentKind::Implementation, "uses helper")
            .id("api")
            .relevance(0.9)
            .depends_on("helper")
            .timestamp(now)
            .build();
        let helper = Fragment::builder("helper", FragmentKind::Implementation, "helper body")
            .id("helper")
            .relevance(0.4)
            .timestamp(now)
            .build();
        let sources: Vec<Arc<dyn ContextSource>> = vec![
            serving(dependent, 50),
            serving(helper, 50),
        ];

        let single = engine(sources.clone());
        let result = single.assemble(&Request::builder("t").build()).await;
        assert_eq!(selected_ids(&result), vec!["helper"]);

        let config = EngineConfig {
            dependency_ordering: DependencyOrdering::Topological,
            ..EngineConfig::default()
        };
        let topo = engine_with(config, sources);
        let result = topo.assemble(&Request::builder("t").build()).await;
        assert_eq!(selected_ids(&result), vec!["helper", "api"]);
    }

    #[tokio::test]
    async fn coverage_reflects_required_aspects() {
        let config = EngineConfig {
            required_aspects: vec!["security".into(), "performance".into()],
            ..EngineConfig::default()
        };
        let fragment = Fragment::builder("sec", FragmentKind::Implementation, "checks input")
            .relevance(0.8)
            .aspect("security")
            .build();
        let engine = engine_with(
            config,
            vec![serving(fragment, 50)],
        );

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert!((result.metrics.coverage - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repeated_assembly_is_deterministic() {
        let now = Utc::now();
        let sources: Vec<Arc<dyn ContextSource>> = (0..5)
            .map(|i| -> Arc<dyn ContextSource> {
                Arc::new(FixedSource {
                    name: format!("s{i}"),
                    fragment: Fragment::builder(format!("s{i}"), FragmentKind::Implementation, format!("body {i}"))
                        .id(format!("s{i}"))
                        .relevance(0.5 + i as f64 / 10.0)
                        .timestamp(now)
                        .build(),
                    priority: 50,
                })
            })
            .collect();
        let engine = engine(sources);
        let req = Request::builder("t").build();

        let first = engine.assemble(&req).await;
        let second = engine.assemble(&req).await;
        assert_eq!(first.package.fragments, second.package.fragments);
        assert_eq!(first.package.sections, second.package.sections);
    }

    #[test]
    fn pipeline_is_idempotent_over_its_own_output() {
        let now = Utc::now();
        let engine = engine(Vec::new());
        let req = Request::builder("t").token_budget(50).build();
        let input: Vec<Fragment> = (0..8)
            .map(|i| {
                Fragment::builder("s", FragmentKind::Implementation, format!("body {i}"))
                    .id(format!("f{i}"))
                    .relevance(0.35 + i as f64 / 20.0)
                    .estimated_size(10)
                    .timestamp(now)
                    .build()
            })
            .collect();

        let once = engine
            .priority
            .prioritize(engine.filter.apply(input, &req, now), &req, now);
        let twice = engine
            .priority
            .prioritize(engine.filter.apply(once.clone(), &req, now), &req, now);
        assert_eq!(once, twice);
        assert_eq!(
            engine.format.format(&once, &req).unwrap(),
            engine.format.format(&twice, &req).unwrap()
        );
    }

    #[tokio::test]
    async fn registry_changes_between_requests_are_picked_up() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = engine(Vec::new());
        assert!(engine.assemble(&Request::builder("t").build()).await.package.is_empty_result());

        engine.registry().register(Arc::new(CountingSource {
            name: "late".into(),
            calls: Arc::clone(&calls),
        }));
        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(result.package.fragments.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(engine.registry().remove("late"));
        assert!(engine.assemble(&Request::builder("t").build()).await.package.is_empty_result());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_and_registration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(engine(Vec::new()));
        let mut handles = Vec::new();

        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                engine.registry().register(Arc::new(CountingSource {
                    name: format!("src-{i}"),
                    calls,
                }));
                engine.assemble(&Request::builder(format!("task {i}")).build()).await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(!result.package.is_error());
            assert!(!result.package.fragments.is_empty());
        }
        assert_eq!(engine.registry().len(), 8);
    }

    #[tokio::test]
    async fn stage_panic_becomes_error_package() {
        for stage in [AssemblyStage::Bounding, AssemblyStage::Filtering, AssemblyStage::Formatting] {
            let mut engine = engine(vec![fixed("code", FragmentKind::Implementation, "fn a() {}", 0.9)]);
            engine.fault = Some(stage);

            let result = engine.assemble(&Request::builder("t").build()).await;
            assert!(result.package.is_error());
            assert!(result.package.fragments.is_empty());
            assert!(result.package.sections.is_empty());
            assert_eq!(result.package.metadata[FAILED_STAGE_KEY], stage.as_str());
            assert!(result.package.metadata[MESSAGE_KEY].contains("fault injected"));
            assert_eq!(result.metrics.fragment_count, 0);
        }
    }

    #[tokio::test]
    async fn out_of_range_relevance_is_clamped_on_collection() {
        let mut wild = Fragment::builder("", FragmentKind::Implementation, "fn wild() {}")
            .id("wild")
            .build();
        wild.relevance = 7.5;
        let engine = engine(vec![Arc::new(FixedSource {
            name: "wild".into(),
            fragment: wild,
            priority: 50,
        })]);

        let result = engine.assemble(&Request::builder("t").build()).await;
        assert_eq!(selected_ids(&result), vec!["wild"]);
        let fragment = &result.package.fragments[0];
        assert_eq!(fragment.relevance, 1.0);
        assert_eq!(fragment.source, "wild");
        assert!(result.metrics.mean_relevance <= 1.0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            reserved_ratio: 1.5,
            ..EngineConfig::default()
        };
        assert!(ContextEngine::builder(config).build().is_err());
    }

    #[test]
    fn request_uses_configured_default_budget() {
        let config = EngineConfig {
            default_token_budget: 1234,
            ..EngineConfig::default()
        };
        let engine = ContextEngine::builder(config).build().unwrap();
        assert_eq!(engine.request("t").build().token_budget, 1234);
    }
}
