//! Incremental graph construction.
//!
//! Insertion follows the layered-graph scheme: descend greedily from the
//! entry point to the new node's level, then beam-search every layer at or
//! below it, linking the new node to a diversity-pruned neighbor set and
//! enforcing degree bounds on everything it touches.

use tracing::debug;

use crate::error::{Result, VaultError};
use crate::graph::{search, VaultIndex};
use crate::metadata::MemoryMetadata;

/// Insert one entry into the graph.
///
/// Validation happens before any mutation: a dimension mismatch or a full
/// index leaves the graph untouched.
pub(crate) fn insert_entry(
    index: &mut VaultIndex,
    id: u64,
    embedding: Vec<f32>,
    metadata: MemoryMetadata,
) -> Result<()> {
    if embedding.len() != index.dimension {
        return Err(VaultError::DimensionMismatch {
            expected: index.dimension,
            actual: embedding.len(),
        });
    }
    metadata.validate()?;

    // Same id again is an upsert: the old entry goes first so the graph
    // never holds two nodes for one id.
    if index.id_to_slot.contains_key(&id) {
        debug!(id, "upsert: removing previous entry");
        index.remove(id);
    }
    if index.len() >= index.capacity {
        return Err(VaultError::CapacityExceeded {
            capacity: index.capacity,
        });
    }

    let level = index.draw_level();
    let slot = index.alloc_slot(id, &embedding, metadata, level);

    // First entry: it is the entry point, no edges to build.
    let Some(entry) = index.entry_point.filter(|&ep| index.live[ep as usize]) else {
        index.ensure_layers(level);
        index.entry_point = Some(slot);
        index.mark_dirty();
        return Ok(());
    };

    let top = index.layers.len() - 1;
    let node_level = level as usize;

    // Phase 1: refine the entry point down to the node's level with 1-NN
    // greedy moves. No edges are added here.
    let mut ep = entry;
    if top > node_level {
        for layer in ((node_level + 1)..=top).rev() {
            ep = search::greedy_search(index, &embedding, ep, layer);
        }
    }

    // Phase 2: at each layer the node belongs to, beam-search with
    // ef_construction, pick diverse neighbors, link bidirectionally.
    for layer in (0..=node_level.min(top)).rev() {
        let candidates = search::search_layer(
            index,
            &embedding,
            ep,
            layer,
            index.params.ef_construction,
            None,
        );
        if let Some(&(best, _)) = candidates.first() {
            ep = best;
        }

        let bound = index.params.max_degree(layer);
        let selected = select_neighbors(index, &embedding, &candidates, bound);

        {
            let list = &mut index.layers[layer].links[slot as usize];
            for &n in &selected {
                if !list.contains(&n) {
                    list.push(n);
                }
            }
        }

        for &n in &selected {
            let overflow = {
                let list = &mut index.layers[layer].links[n as usize];
                if !list.contains(&slot) {
                    list.push(slot);
                }
                list.len() > bound
            };
            if overflow {
                shed_worst_edge(index, n, layer, bound);
            }
        }
    }

    // Phase 3: a new top level promotes the node to entry point.
    if node_level > top {
        index.ensure_layers(level);
        index.entry_point = Some(slot);
        debug!(id, level, "promoted entry point");
    }

    index.mark_dirty();
    Ok(())
}

/// Diversity-pruned neighbor selection.
///
/// Criterion: keep a candidate only if it is closer to the new node than to
/// every already-selected neighbor. Remaining capacity is backfilled with
/// the closest rejected candidates so sparse regions still reach the bound.
pub(crate) fn select_neighbors(
    index: &VaultIndex,
    _query: &[f32],
    candidates: &[(u32, f32)],
    m: usize,
) -> Vec<u32> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<(u32, f32)> = candidates.to_vec();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut selected = Vec::with_capacity(m.min(sorted.len()));
    selected.push(sorted[0].0);

    for &(candidate, query_dist) in sorted.iter().skip(1) {
        if selected.len() >= m {
            break;
        }
        let candidate_vec = index.vector(candidate);
        let diverse = selected.iter().all(|&s| {
            let inter = index.metric.distance(index.vector(s), candidate_vec);
            query_dist < inter
        });
        if diverse {
            selected.push(candidate);
        }
    }

    // Backfill with closest remaining.
    for &(candidate, _) in &sorted {
        if selected.len() >= m {
            break;
        }
        if !selected.contains(&candidate) {
            selected.push(candidate);
        }
    }

    selected
}

/// Re-prune an over-bound neighbor list down to its closest `bound` edges.
fn shed_worst_edge(index: &mut VaultIndex, node: u32, layer: usize, bound: usize) {
    let mut ranked: Vec<(u32, f32)> = index.layers[layer].links[node as usize]
        .iter()
        .map(|&x| {
            (
                x,
                index.metric.distance(index.vector(node), index.vector(x)),
            )
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked.truncate(bound);
    index.layers[layer].links[node as usize] = ranked.into_iter().map(|(x, _)| x).collect();
}
