//! Distance metrics for dense vectors.
//!
//! Each index fixes its metric at creation; the metric participates in
//! snapshots so a reloaded index compares vectors exactly as the original
//! did.
//!
//! ## Important nuance
//!
//! [`cosine_distance`] is defined as `1 - cos(a, b)` and computes norms when
//! needed, so inputs do **not** have to be L2-normalized. The similarity a
//! search result reports is derived from the distance via
//! [`DistanceMetric::similarity`]: the cosine inverse for cosine, and the
//! bounded `1 / (1 + d)` mapping for the additive metrics.

use serde::{Deserialize, Serialize};

use crate::simd;

/// Distance metric for dense vectors, fixed per index at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Cosine distance `1 - cos(a, b)`.
    Cosine,
    /// Euclidean (L2) distance.
    Euclidean,
    /// Manhattan (L1) distance.
    Manhattan,
}

impl DistanceMetric {
    /// Compute distance between two vectors.
    ///
    /// If dimensions mismatch, this returns `f32::INFINITY` (so it is never
    /// selected as a nearest neighbor).
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::Euclidean => simd::l2_distance(a, b),
            DistanceMetric::Manhattan => simd::l1_distance(a, b),
        }
    }

    /// Map a distance back to a similarity in a bounded range.
    ///
    /// Cosine: `1 - d`, in `[-1, 1]`. Euclidean/Manhattan: `1 / (1 + d)`,
    /// in `(0, 1]`. Both are strictly decreasing in distance.
    #[inline]
    #[must_use]
    pub fn similarity(self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::Euclidean | DistanceMetric::Manhattan => 1.0 / (1.0 + distance),
        }
    }
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

/// Cosine distance `1 - cos(a, b)`.
///
/// This computes cosine similarity (including norms), so it does **not**
/// require pre-normalized vectors.
#[inline]
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    1.0 - simd::cosine(a, b).clamp(-1.0, 1.0)
}

/// Normalize a vector to unit L2 norm.
#[inline]
#[must_use]
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let n = simd::norm(v);
    if n < 1e-10 {
        return vec![0.0; v.len()];
    }
    v.iter().map(|x| x / n).collect()
}
