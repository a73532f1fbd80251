//! Query model and planning.
//!
//! The graph is filter-agnostic: metadata filters run *after* traversal,
//! on the candidates the graph returns. The planner compensates for
//! post-filter attrition by over-fetching, and maps the caller's search
//! mode onto a beam width.

use crate::metadata::MemoryMetadata;

/// How aggressively to trade latency for recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Default: beam width is the index default (at least k).
    #[default]
    Semantic,
    /// Wider beam (`2k`) for mixed semantic/filtered workloads.
    Hybrid,
    /// Widest beam (`4k`); still approximate, just slower and better.
    Exact,
}

/// A caller's search request against one owner's index.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query embedding; must match the index dimension.
    pub vector: Vec<f32>,
    /// Optional raw query text, used only for the topic-overlap bonus.
    pub text: Option<String>,
    pub k: usize,
    /// Drop results scoring below this.
    pub threshold: Option<f32>,
    /// Keep only these categories (empty = no constraint).
    pub categories: Vec<String>,
    /// Keep entries sharing at least one tag (empty = no constraint).
    pub tags: Vec<String>,
    /// Inclusive `created_at` range, unix seconds.
    pub date_range: Option<(u64, u64)>,
    /// Inclusive importance range.
    pub importance_range: Option<(u8, u8)>,
    pub mode: SearchMode,
    /// Apply the recency boost during scoring.
    pub boost_recent: bool,
    /// 0 disables; 1 admits only maximally dissimilar results.
    pub diversity_factor: f32,
    /// Attach cluster info to each result.
    pub with_clusters: bool,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            text: None,
            k,
            threshold: None,
            categories: Vec::new(),
            tags: Vec::new(),
            date_range: None,
            importance_range: None,
            mode: SearchMode::Semantic,
            boost_recent: false,
            diversity_factor: 0.0,
            with_clusters: false,
        }
    }

    /// Whether any post-filter is active.
    pub(crate) fn has_filters(&self) -> bool {
        !self.categories.is_empty()
            || !self.tags.is_empty()
            || self.date_range.is_some()
            || self.importance_range.is_some()
    }
}

/// Index-search parameters derived from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchPlan {
    /// Beam width handed to the graph.
    pub ef: usize,
    /// Candidates to pull from the graph before post-filtering.
    pub fetch_k: usize,
}

/// Over-fetch factor compensating for post-filter attrition.
const FILTER_OVERFETCH: usize = 3;

/// Translate a query into graph-search parameters.
pub(crate) fn plan(query: &SearchQuery, ef_search_default: usize) -> SearchPlan {
    let k = query.k;
    let ef = match query.mode {
        SearchMode::Exact => k * 4,
        SearchMode::Hybrid => k * 2,
        SearchMode::Semantic => ef_search_default.max(k),
    };
    let needs_overfetch =
        query.has_filters() || query.threshold.is_some() || query.diversity_factor > 0.0;
    let fetch_k = if needs_overfetch {
        k * FILTER_OVERFETCH
    } else {
        k
    };
    SearchPlan {
        ef: ef.max(fetch_k),
        fetch_k,
    }
}

/// Apply the query's metadata filters to one candidate.
pub(crate) fn matches_filters(query: &SearchQuery, metadata: &MemoryMetadata) -> bool {
    if !query.categories.is_empty() {
        match &metadata.category {
            Some(c) => {
                if !query.categories.iter().any(|q| q == c) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if !query.tags.is_empty() && !query.tags.iter().any(|t| metadata.tags.contains(t)) {
        return false;
    }
    if let Some((from, to)) = query.date_range {
        if metadata.created_at < from || metadata.created_at > to {
            return false;
        }
    }
    if let Some((lo, hi)) = query.importance_range {
        if metadata.importance < lo || metadata.importance > hi {
            return false;
        }
    }
    true
}

/// Greedy diversity re-ranking.
///
/// `embeddings` are candidate vectors in ranked order. A candidate is
/// skipped when its cosine similarity to any already-selected result
/// exceeds `1 - factor`; if fewer than `k` survive, the skipped ones
/// backfill in rank order.
pub(crate) fn diversify(embeddings: &[&[f32]], factor: f32, k: usize) -> Vec<usize> {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || embeddings.len() <= 1 {
        return (0..embeddings.len().min(k)).collect();
    }
    let threshold = 1.0 - factor;

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    for (i, candidate) in embeddings.iter().enumerate() {
        if selected.len() >= k {
            break;
        }
        let redundant = selected
            .iter()
            .any(|&s| crate::simd::cosine(embeddings[s], candidate) > threshold);
        if !redundant {
            selected.push(i);
        }
    }
    for i in 0..embeddings.len() {
        if selected.len() >= k {
            break;
        }
        if !selected.contains(&i) {
            selected.push(i);
        }
    }
    selected
}
