//! Layered k-NN search.
//!
//! Queries descend the layer stack with 1-NN greedy moves until layer 1,
//! then run a bounded beam at the base layer: a min-heap of frontier
//! candidates expanded closest-first against a max-heap of the best `ef`
//! results seen so far. The search stops when the closest unexpanded
//! candidate cannot improve the working set.
//!
//! The beam is anytime-capable: an expired [`Deadline`] stops expansion
//! and returns whatever top-k has been accumulated, rather than failing.

use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use crate::graph::{Neighbor, VaultIndex};

/// External cancellation signal for searches.
///
/// Cheap to copy; check frequency is once per beam expansion, so expiry
/// latency is bounded by a single neighbor-list scan.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Deadline at a fixed instant.
    #[must_use]
    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    /// Deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    #[inline]
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Frontier candidate; min-heap (closest first).
#[derive(PartialEq)]
struct MinCandidate {
    slot: u32,
    distance: f32,
}

impl Eq for MinCandidate {}

impl Ord for MinCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.distance.total_cmp(&self.distance)
    }
}

impl PartialOrd for MinCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Working-set entry; max-heap (worst kept result on top, for pruning).
#[derive(PartialEq)]
struct MaxResult {
    slot: u32,
    distance: f32,
}

impl Eq for MaxResult {}

impl Ord for MaxResult {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

impl PartialOrd for MaxResult {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// 1-NN greedy hill climb within one layer.
///
/// Moves only to a strictly closer neighbor, so it terminates at a local
/// minimum in O(path length · degree).
pub(crate) fn greedy_search(index: &VaultIndex, query: &[f32], entry: u32, layer: usize) -> u32 {
    let mut best = entry;
    let mut best_dist = index.distance_to(query, best);
    loop {
        let mut improved = false;
        for &n in index.layers[layer].neighbors(best) {
            let d = index.distance_to(query, n);
            if d < best_dist {
                best = n;
                best_dist = d;
                improved = true;
            }
        }
        if !improved {
            return best;
        }
    }
}

/// Bounded beam search within one layer.
///
/// Returns up to `ef` `(slot, distance)` pairs sorted by ascending
/// distance. Expansion stops early when `deadline` expires; the results
/// gathered so far are still returned.
pub(crate) fn search_layer(
    index: &VaultIndex,
    query: &[f32],
    entry: u32,
    layer: usize,
    ef: usize,
    deadline: Option<Deadline>,
) -> Vec<(u32, f32)> {
    let mut candidates: BinaryHeap<MinCandidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<MaxResult> = BinaryHeap::with_capacity(ef + 1);
    let mut visited: HashSet<u32> = HashSet::with_capacity(ef * 2);

    let entry_distance = index.distance_to(query, entry);
    candidates.push(MinCandidate {
        slot: entry,
        distance: entry_distance,
    });
    results.push(MaxResult {
        slot: entry,
        distance: entry_distance,
    });
    visited.insert(entry);

    while let Some(candidate) = candidates.pop() {
        let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
        if candidate.distance > worst && results.len() >= ef {
            break;
        }
        if deadline.is_some_and(|d| d.expired()) {
            break;
        }

        for &neighbor in index.layers[layer].neighbors(candidate.slot) {
            if visited.insert(neighbor) {
                let distance = index.distance_to(query, neighbor);
                let worst = results.peek().map(|r| r.distance).unwrap_or(f32::INFINITY);
                if results.len() < ef || distance < worst {
                    candidates.push(MinCandidate {
                        slot: neighbor,
                        distance,
                    });
                    results.push(MaxResult {
                        slot: neighbor,
                        distance,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }
    }

    let mut output: Vec<(u32, f32)> = results
        .into_iter()
        .map(|r| (r.slot, r.distance))
        .collect();
    output.sort_by(|a, b| a.1.total_cmp(&b.1));
    output
}

/// Full layered k-NN. Caller guarantees a non-empty index and a
/// dimension-checked query.
pub(crate) fn knn(
    index: &VaultIndex,
    query: &[f32],
    k: usize,
    ef: usize,
    deadline: Option<Deadline>,
) -> Vec<Neighbor> {
    // Defensive: a stale entry point (possible only through invariant
    // drift) falls back to the lowest live slot instead of failing.
    let entry = index
        .entry_point
        .filter(|&ep| index.live[ep as usize])
        .or_else(|| index.id_to_slot.values().copied().min());
    let Some(mut entry) = entry else {
        return Vec::new();
    };

    let top = index.layers.len().saturating_sub(1);
    for layer in (1..=top).rev() {
        entry = greedy_search(index, query, entry, layer);
    }

    let working_set = ef.max(k);
    let hits = search_layer(index, query, entry, 0, working_set, deadline);

    let mut neighbors: Vec<Neighbor> = hits
        .into_iter()
        .map(|(slot, distance)| Neighbor {
            id: index.slot_ids[slot as usize],
            distance,
        })
        .collect();
    // Ascending distance, ties to the lower id (earlier insertion wins).
    neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    neighbors.truncate(k);
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceMetric;
    use crate::graph::GraphParams;
    use crate::metadata::MemoryMetadata;

    fn ring_index(n: u64) -> VaultIndex {
        let mut idx =
            VaultIndex::new(2, 100_000, DistanceMetric::Cosine, GraphParams::default()).unwrap();
        for i in 0..n {
            let angle = i as f32 * std::f32::consts::TAU / n as f32;
            idx.insert(i, vec![angle.cos(), angle.sin()], MemoryMetadata::default())
                .unwrap();
        }
        idx
    }

    #[test]
    fn knn_finds_exact_match_first() {
        let idx = ring_index(64);
        let query = [1.0, 0.0];
        let hits = idx.knn(&query, 3, Some(32), None).unwrap();
        assert_eq!(hits[0].id, 0);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn results_sorted_ascending_with_id_tiebreak() {
        let idx = ring_index(64);
        // Equidistant from ids 1 and 63 (symmetric around angle 0).
        let hits = idx.knn(&[1.0, 0.0], 3, Some(64), None).unwrap();
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        let tied: Vec<u64> = hits
            .iter()
            .filter(|h| (h.distance - hits[1].distance).abs() < 1e-7)
            .map(|h| h.id)
            .collect();
        if tied.len() == 2 {
            assert!(tied[0] < tied[1]);
        }
    }

    #[test]
    fn expired_deadline_returns_partial_results() {
        let idx = ring_index(256);
        let dead = Deadline::at(Instant::now() - Duration::from_millis(1));
        let hits = idx.knn(&[0.0, 1.0], 10, Some(128), Some(dead)).unwrap();
        // Best-effort: never an error, at most k results.
        assert!(hits.len() <= 10);
    }

    #[test]
    fn greedy_search_reaches_local_minimum() {
        let idx = ring_index(32);
        let query = [0.0, 1.0]; // id 8 is at angle pi/2
        let best = greedy_search(&idx, &query, 0, 0);
        let best_dist = idx.distance_to(&query, best);
        for &n in idx.layers[0].neighbors(best) {
            assert!(idx.distance_to(&query, n) >= best_dist);
        }
    }
}
