//! Filter stage — drops fragments that should never reach prioritization.
//!
//! Predicates run per fragment in a fixed order and short-circuit:
//!
//! 1. kind excluded by the request
//! 2. relevance below the configured minimum
//! 3. exact duplicate of an earlier fragment's content (first occurrence wins)
//! 4. older than the configured maximum age (only when one is configured)
//! 5. rejected by a custom rule
//!
//! A rule that errors or panics drops only the fragment it was evaluating.

use chrono::{DateTime, Utc};
use contextloom_core::error::FilterError;
use contextloom_core::fragment::Fragment;
use contextloom_core::request::Request;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::panic_message;

/// A caller-supplied predicate over `(fragment, request)`.
///
/// `Ok(true)` keeps the fragment, `Ok(false)` drops it, `Err` drops it and
/// logs the failure.
pub trait FilterRule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, fragment: &Fragment, request: &Request) -> Result<bool, FilterError>;
}

/// A [`FilterRule`] backed by a closure.
pub struct FnRule<F> {
    name: String,
    predicate: F,
}

impl<F> FilterRule for FnRule<F>
where
    F: Fn(&Fragment, &Request) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, fragment: &Fragment, request: &Request) -> Result<bool, FilterError> {
        Ok((self.predicate)(fragment, request))
    }
}

/// Wrap a closure as a named filter rule.
pub fn rule<F>(name: impl Into<String>, predicate: F) -> Arc<dyn FilterRule>
where
    F: Fn(&Fragment, &Request) -> bool + Send + Sync + 'static,
{
    Arc::new(FnRule {
        name: name.into(),
        predicate,
    })
}

/// Why a fragment was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Keep,
    Excluded,
    BelowThreshold,
    Duplicate,
    Stale,
    Rejected(String),
}

/// The filter stage. Pure apart from logging.
#[derive(Clone)]
pub struct FilterStage {
    min_relevance: f64,
    max_age: Option<Duration>,
    rules: Vec<Arc<dyn FilterRule>>,
}

impl FilterStage {
    pub fn new(min_relevance: f64, max_age: Option<Duration>) -> Self {
        Self {
            min_relevance,
            max_age,
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Arc<dyn FilterRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Arc<dyn FilterRule>>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Filter `fragments` for `request`, judging staleness against `now`.
    ///
    /// The output is a subsequence of the input.
    pub fn apply(&self, fragments: Vec<Fragment>, request: &Request, now: DateTime<Utc>) -> Vec<Fragment> {
        let total = fragments.len();
        let mut seen_content: HashSet<String> = HashSet::new();
        let mut kept = Vec::with_capacity(total);

        for fragment in fragments {
            let verdict = catch_unwind(AssertUnwindSafe(|| {
                self.judge(&fragment, request, now, &mut seen_content)
            }));

            match verdict {
                Ok(Verdict::Keep) => kept.push(fragment),
                Ok(reason) => {
                    debug!(fragment = %fragment.id, source = %fragment.source, ?reason, "Fragment filtered");
                }
                Err(panic) => {
                    warn!(
                        fragment = %fragment.id,
                        source = %fragment.source,
                        panic = %panic_message(&panic),
                        "Filter panicked on fragment, dropping it"
                    );
                }
            }
        }

        debug!(total, kept = kept.len(), "Filter stage complete");
        kept
    }

    fn judge(
        &self,
        fragment: &Fragment,
        request: &Request,
        now: DateTime<Utc>,
        seen_content: &mut HashSet<String>,
    ) -> Verdict {
        if request.excluded_kinds.contains(&fragment.kind) {
            return Verdict::Excluded;
        }

        if fragment.relevance < self.min_relevance {
            return Verdict::BelowThreshold;
        }

        if !seen_content.insert(fragment.content.clone()) {
            return Verdict::Duplicate;
        }

        if let Some(max_age) = self.max_age {
            let age = (now - fragment.timestamp).to_std().unwrap_or_default();
            if age > max_age {
                return Verdict::Stale;
            }
        }

        for rule in &self.rules {
            match rule.evaluate(fragment, request) {
                Ok(true) => {}
                Ok(false) => return Verdict::Rejected(rule.name().to_string()),
                Err(e) => {
                    warn!(fragment = %fragment.id, rule = %rule.name(), error = %e, "Filter rule failed, dropping fragment");
                    return Verdict::Rejected(rule.name().to_string());
                }
            }
        }

        Verdict::Keep
    }
}
