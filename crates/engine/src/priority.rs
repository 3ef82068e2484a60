//! Priority stage — scores fragments and picks the subset that fits the budget.
//!
//! # Scoring
//!
//! | Weight | Signal |
//! |--------|--------|
//! | 0.4 | source-assigned relevance |
//! | 0.3 | kind is one of the request's preferred kinds |
//! | 0.2 | share of focus areas matched by the fragment's aspects |
//! | 0.1 | recency, `1 / (1 + age_minutes / 60)` |
//!
//! # Selection
//!
//! Greedy by score with dependency gating and a reserved slice of the budget
//! that only fragments scoring above [`RESERVED_SLICE_SCORE`] may dip into.
//! Greedy-by-score stands in for the knapsack solve; the reserved slice keeps
//! a few very relevant fragments from being starved by cheaper ones.
//!
//! With [`DependencyOrdering::SinglePass`] a fragment whose dependency ranks
//! lower than itself is skipped for this request.

use chrono::{DateTime, Utc};
use contextloom_config::DependencyOrdering;
use contextloom_core::fragment::Fragment;
use contextloom_core::request::Request;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

pub const RELEVANCE_WEIGHT: f64 = 0.4;
pub const PREFERRED_KIND_WEIGHT: f64 = 0.3;
pub const FOCUS_WEIGHT: f64 = 0.2;
pub const RECENCY_WEIGHT: f64 = 0.1;

/// Scores strictly above this may use the reserved slice.
pub const RESERVED_SLICE_SCORE: f64 = 0.8;

/// A fragment paired with its priority score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub fragment: Fragment,
    pub score: f64,
}

/// Score one fragment against a request at time `now`.
pub fn score(fragment: &Fragment, request: &Request, now: DateTime<Utc>) -> f64 {
    let preferred = if request.preferred_kinds.contains(&fragment.kind) {
        1.0
    } else {
        0.0
    };

    let matched = request
        .focus_areas
        .iter()
        .filter(|area| fragment.has_aspect(area))
        .count();
    let focus = matched as f64 / request.focus_areas.len().max(1) as f64;

    let recency = 1.0 / (1.0 + fragment.age_minutes(now) / 60.0);

    RELEVANCE_WEIGHT * fragment.relevance
        + PREFERRED_KIND_WEIGHT * preferred
        + FOCUS_WEIGHT * focus
        + RECENCY_WEIGHT * recency
}

/// The priority stage.
#[derive(Debug, Clone)]
pub struct PriorityStage {
    reserved_ratio: f64,
    ordering: DependencyOrdering,
}

impl PriorityStage {
    pub fn new(reserved_ratio: f64, ordering: DependencyOrdering) -> Self {
        Self {
            reserved_ratio: reserved_ratio.clamp(0.0, 1.0),
            ordering,
        }
    }

    /// Score and stably sort by score descending. Collection order breaks ties.
    ///
    /// Fragments whose score is not finite are dropped.
    pub fn rank(&self, fragments: Vec<Fragment>, request: &Request, now: DateTime<Utc>) -> Vec<ScoredFragment> {
        let mut ranked: Vec<ScoredFragment> = fragments
            .into_iter()
            .filter_map(|fragment| {
                let s = score(&fragment, request, now);
                if s.is_finite() {
                    Some(ScoredFragment { fragment, score: s })
                } else {
                    warn!(fragment = %fragment.id, source = %fragment.source, "Fragment produced a non-finite score, dropping it");
                    None
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    /// Rank and select within `request.token_budget`.
    pub fn prioritize(&self, fragments: Vec<Fragment>, request: &Request, now: DateTime<Utc>) -> Vec<Fragment> {
        let ranked = self.rank(fragments, request, now);
        let ranked = match self.ordering {
            DependencyOrdering::SinglePass => ranked,
            DependencyOrdering::Topological => dependency_first(ranked),
        };
        self.select(ranked, request.token_budget)
    }

    /// Walk `ranked` once, accepting fragments that fit.
    ///
    /// Returns fragments in acceptance order. The total size never exceeds
    /// `budget`.
    pub fn select(&self, ranked: Vec<ScoredFragment>, budget: usize) -> Vec<Fragment> {
        if budget == 0 {
            return Vec::new();
        }

        let reserved = (budget as f64 * self.reserved_ratio).floor() as usize;
        let available = budget - reserved.min(budget);

        let mut selected: Vec<Fragment> = Vec::new();
        let mut selected_ids: HashSet<String> = HashSet::new();
        let mut running = 0usize;

        for candidate in ranked {
            if running >= budget {
                break;
            }

            let fragment = candidate.fragment;
            if let Some(missing) = fragment
                .dependencies
                .iter()
                .find(|dep| !selected_ids.contains(dep.as_str()))
            {
                debug!(fragment = %fragment.id, dependency = %missing, "Dependency not yet selected, skipping");
                continue;
            }

            let next = running.saturating_add(fragment.estimated_size);
            if next <= available {
                running = next;
            } else if candidate.score > RESERVED_SLICE_SCORE && running < available && next <= budget {
                debug!(
                    fragment = %fragment.id,
                    score = candidate.score,
                    size = fragment.estimated_size,
                    "Admitting fragment through reserved slice"
                );
                running = next;
            } else {
                continue;
            }

            selected_ids.insert(fragment.id.clone());
            selected.push(fragment);
        }

        debug!(selected = selected.len(), used = running, budget, reserved, "Priority stage complete");
        selected
    }
}

/// Reorder so every dependency present in the list precedes its dependents,
/// otherwise keeping rank order. Fragments caught in cycles keep their
/// relative order at the end, where the walk gates them out.
fn dependency_first(ranked: Vec<ScoredFragment>) -> Vec<ScoredFragment> {
    let index_of: HashMap<&str, usize> = ranked
        .iter()
        .enumerate()
        .rev()
        .map(|(i, s)| (s.fragment.id.as_str(), i))
        .collect();

    let mut pending = vec![0usize; ranked.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ranked.len()];
    for (i, candidate) in ranked.iter().enumerate() {
        let deps: BTreeSet<usize> = candidate
            .fragment
            .dependencies
            .iter()
            .filter_map(|d| index_of.get(d.as_str()).copied())
            .filter(|&j| j != i)
            .collect();
        pending[i] = deps.len();
        for j in deps {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..ranked.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(ranked.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }

    let placed: HashSet<usize> = order.iter().copied().collect();
    order.extend((0..ranked.len()).filter(|i| !placed.contains(i)));

    let mut slots: Vec<Option<ScoredFragment>> = ranked.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
