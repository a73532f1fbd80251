//! Multi-factor relevance scoring.
//!
//! Raw similarity dominates (70% weight); metadata-derived signals nudge
//! the ranking without ever overturning a clearly better match. The final
//! score is clamped to [0, 1] and is monotone non-decreasing in
//! similarity, all else equal. This is a ranking heuristic, not a
//! correctness-critical algorithm.

use crate::metadata::MemoryMetadata;
use crate::query::SearchQuery;
use crate::simd;

const SIMILARITY_WEIGHT: f32 = 0.7;
const IMPORTANCE_STEP: f32 = 0.02;
const CATEGORY_BONUS: f32 = 0.15;
const TOPIC_BONUS: f32 = 0.10;
const QUALITY_BONUS: f32 = 0.05;
const CONSISTENCY_WEIGHT: f32 = 0.10;
const RECENCY_WEIGHT: f32 = 0.10;

/// Recency half-life in days: under a day the boost is ~1.0, past 90
/// days it has decayed to ~0. The boost is additive (see DESIGN.md).
const RECENCY_HALF_LIFE_DAYS: f64 = 15.0;

/// Zero-vector guard: embeddings with a norm at or below this get no
/// quality bonus.
const QUALITY_NORM_FLOOR: f32 = 0.1;

/// Combine raw similarity with metadata signals into a final [0, 1] score.
///
/// `now` is unix seconds, injected so scoring stays deterministic in tests.
#[must_use]
pub fn relevance_score(
    similarity: f32,
    metadata: &MemoryMetadata,
    query: &SearchQuery,
    doc_vector: &[f32],
    now: u64,
) -> f32 {
    let base = similarity * SIMILARITY_WEIGHT;

    let importance_adj = (f32::from(metadata.importance) - 5.0) * IMPORTANCE_STEP;

    let category_bonus = match &metadata.category {
        Some(c) if query.categories.iter().any(|q| q == c) => CATEGORY_BONUS,
        _ => 0.0,
    };

    let topic_bonus = match (&metadata.topic, &query.text) {
        (Some(topic), Some(text)) if topic_overlaps(topic, text) => TOPIC_BONUS,
        _ => 0.0,
    };

    let quality_bonus = if simd::norm(doc_vector) > QUALITY_NORM_FLOOR {
        QUALITY_BONUS
    } else {
        0.0
    };

    // Secondary agreement check, independent of the index metric: angle
    // agreement between query and document, normalized to [0, 1].
    let consistency = CONSISTENCY_WEIGHT * angle_agreement(&query.vector, doc_vector);

    let recency_adj = if query.boost_recent {
        RECENCY_WEIGHT * recency_factor(metadata.age_days(now))
    } else {
        0.0
    };

    (base + importance_adj + category_bonus + topic_bonus + quality_bonus + consistency
        + recency_adj)
        .clamp(0.0, 1.0)
}

/// Case-insensitive substring overlap, either direction.
fn topic_overlaps(topic: &str, text: &str) -> bool {
    if topic.is_empty() || text.is_empty() {
        return false;
    }
    let topic = topic.to_lowercase();
    let text = text.to_lowercase();
    topic.contains(&text) || text.contains(&topic)
}

/// Cosine agreement mapped from [-1, 1] onto [0, 1].
fn angle_agreement(query: &[f32], doc: &[f32]) -> f32 {
    if query.len() != doc.len() || query.is_empty() {
        return 0.0;
    }
    (simd::cosine(query, doc).clamp(-1.0, 1.0) + 1.0) / 2.0
}

/// Exponential decay in age: ~1.0 under a day, ~0.0 past 90 days.
fn recency_factor(age_days: f64) -> f32 {
    (-age_days / RECENCY_HALF_LIFE_DAYS).exp() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> SearchQuery {
        SearchQuery::new(vec![1.0, 0.0], 10)
    }

    fn meta() -> MemoryMetadata {
        MemoryMetadata {
            created_at: 0,
            updated_at: 0,
            ..Default::default()
        }
    }

    #[test]
    fn score_is_bounded() {
        let mut q = query();
        q.categories = vec!["a".to_string()];
        q.text = Some("everything".to_string());
        q.boost_recent = true;
        let m = MemoryMetadata {
            category: Some("a".to_string()),
            topic: Some("everything".to_string()),
            importance: 10,
            created_at: u64::MAX,
            updated_at: u64::MAX,
            ..Default::default()
        };
        let s = relevance_score(1.0, &m, &q, &[1.0, 0.0], u64::MAX);
        assert!((0.0..=1.0).contains(&s));

        let low = relevance_score(-1.0, &meta(), &query(), &[0.0, 0.0], 0);
        assert!((0.0..=1.0).contains(&low));
    }

    #[test]
    fn monotone_in_similarity() {
        let m = meta();
        let q = query();
        let doc = [0.5, 0.5];
        let mut prev = relevance_score(0.0, &m, &q, &doc, 0);
        for step in 1..=10 {
            let s = relevance_score(step as f32 / 10.0, &m, &q, &doc, 0);
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn category_match_outranks_mismatch() {
        let mut q = query();
        q.categories = vec!["work".to_string()];
        let matched = MemoryMetadata {
            category: Some("work".to_string()),
            ..meta()
        };
        let unmatched = MemoryMetadata {
            category: Some("play".to_string()),
            ..meta()
        };
        let doc = [1.0, 0.0];
        assert!(
            relevance_score(0.5, &matched, &q, &doc, 0)
                > relevance_score(0.5, &unmatched, &q, &doc, 0)
        );
    }

    #[test]
    fn topic_overlap_is_case_insensitive_both_directions() {
        assert!(topic_overlaps("Rust Programming", "rust"));
        assert!(topic_overlaps("rust", "Rust Programming"));
        assert!(!topic_overlaps("rust", "python"));
        assert!(!topic_overlaps("", "anything"));
    }

    #[test]
    fn zero_vector_gets_no_quality_bonus() {
        let q = query();
        let m = meta();
        let strong = relevance_score(0.5, &m, &q, &[1.0, 0.0], 0);
        let degenerate = relevance_score(0.5, &m, &q, &[0.01, 0.0], 0);
        assert!(strong > degenerate);
    }

    #[test]
    fn recency_boost_decays_with_age() {
        assert!(recency_factor(0.5) > 0.95);
        assert!(recency_factor(90.0) < 0.01);

        let mut q = query();
        q.boost_recent = true;
        let now = 100 * 86_400;
        let fresh = MemoryMetadata {
            created_at: now - 3_600,
            updated_at: now - 3_600,
            ..meta()
        };
        let stale = MemoryMetadata {
            created_at: 0,
            updated_at: 0,
            ..meta()
        };
        let doc = [1.0, 0.0];
        assert!(relevance_score(0.5, &fresh, &q, &doc, now) > relevance_score(0.5, &stale, &q, &doc, now));
    }

    #[test]
    fn importance_defaults_to_neutral() {
        let q = query();
        let doc = [1.0, 0.0];
        let neutral = relevance_score(0.5, &meta(), &q, &doc, 0);
        let important = relevance_score(
            0.5,
            &MemoryMetadata {
                importance: 10,
                ..meta()
            },
            &q,
            &doc,
            0,
        );
        let trivial = relevance_score(
            0.5,
            &MemoryMetadata {
                importance: 1,
                ..meta()
            },
            &q,
            &doc,
            0,
        );
        assert!(important > neutral);
        assert!(trivial < neutral);
        assert!((important - neutral - 5.0 * 0.02).abs() < 1e-6);
    }
}
