//! Layered proximity-graph index, one per owner.
//!
//! # Structure
//!
//! The index keeps a stack of layers. Layer 0 holds every live entry;
//! layer `l > 0` holds exactly the entries whose level (drawn once at
//! insert from a geometric distribution) is at least `l`. Upper layers are
//! sparse long-range routing, the base layer is dense and local:
//!
//! - **Insert**: greedy-descend from the entry point to the new node's
//!   level, then beam-search each layer below it and link to a
//!   diversity-pruned neighbor set (see `construction`).
//! - **Search**: greedy-descend to layer 1, then run a bounded beam at
//!   layer 0 (see `search`).
//!
//! # Storage
//!
//! Vectors live in one flat `Vec<f32>` addressed by internal slot; slots
//! freed by removals are recycled. Adjacency is a bounded `SmallVec` per
//! `(slot, layer)`. External ids are `u64` and never leak slot numbers:
//! searches translate back before returning.
//!
//! Degree bounds (`M` per layer, `2M` at layer 0) are enforced on every
//! insertion that touches a node. The entry point always belongs to the
//! highest non-empty layer; deletions repair it by rescanning the top
//! layer rather than failing.

pub(crate) mod construction;
pub(crate) mod search;

pub use search::Deadline;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::debug;

use crate::distance::DistanceMetric;
use crate::error::{Result, VaultError};
use crate::metadata::{now_secs, MemoryMetadata};

/// Hard cap on layer levels. With `ml = 1/ln(16)` the geometric draw
/// exceeds this with probability ~1e-38; the clamp only guards a
/// pathological RNG.
pub(crate) const MAX_LEVEL: u8 = 31;

/// Tuning parameters for graph construction and search.
#[derive(Debug, Clone)]
pub struct GraphParams {
    /// Max bidirectional edges per node per layer (`2M` at layer 0).
    pub m: usize,
    /// Beam width during construction.
    pub ef_construction: usize,
    /// Default beam width for searches that do not override it.
    pub ef_search_default: usize,
    /// Level multiplier for the geometric level draw; `1/ln(M)` unless
    /// overridden.
    pub ml: f64,
    /// Seed for the level-assignment RNG; fixed seed + fixed insertion
    /// order reproduces the graph exactly.
    pub level_seed: u64,
}

impl Default for GraphParams {
    fn default() -> Self {
        let m = 16;
        Self {
            m,
            ef_construction: 200,
            ef_search_default: 50,
            ml: 1.0 / (m as f64).ln(),
            level_seed: 0x5f3a_9d2c,
        }
    }
}

impl GraphParams {
    /// Degree bound for a layer: `2M` at the base, `M` above it.
    #[inline]
    pub(crate) fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn validate(&self) -> Result<()> {
        if self.m < 2 {
            return Err(VaultError::InvalidParameter(format!(
                "m must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 || self.ef_search_default == 0 {
            return Err(VaultError::InvalidParameter(
                "ef_construction and ef_search_default must be positive".to_string(),
            ));
        }
        if !self.ml.is_finite() || self.ml <= 0.0 {
            return Err(VaultError::InvalidParameter(format!(
                "ml must be positive and finite, got {}",
                self.ml
            )));
        }
        Ok(())
    }
}

/// One graph layer: a neighbor list per slot.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layer {
    pub(crate) links: Vec<SmallVec<[u32; 16]>>,
}

impl Layer {
    pub(crate) fn with_slots(slots: usize) -> Self {
        Self {
            links: vec![SmallVec::new(); slots],
        }
    }

    #[inline]
    pub(crate) fn neighbors(&self, slot: u32) -> &[u32] {
        &self.links[slot as usize]
    }

    pub(crate) fn ensure_slot(&mut self, slot: u32) {
        if self.links.len() <= slot as usize {
            self.links.resize(slot as usize + 1, SmallVec::new());
        }
    }
}

/// A search hit: external id plus raw distance under the index metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
}

/// Per-owner ANN index over fixed-dimension embeddings.
pub struct VaultIndex {
    pub(crate) dimension: usize,
    pub(crate) capacity: usize,
    pub(crate) metric: DistanceMetric,
    pub(crate) params: GraphParams,

    /// Flat slot-major vector storage (`slot * dimension ..`).
    pub(crate) vectors: Vec<f32>,
    /// Level drawn at insert, immutable afterwards.
    pub(crate) levels: Vec<u8>,
    pub(crate) live: Vec<bool>,
    /// Slot -> external id.
    pub(crate) slot_ids: Vec<u64>,
    /// Slot -> metadata.
    pub(crate) metas: Vec<MemoryMetadata>,
    pub(crate) id_to_slot: HashMap<u64, u32>,
    /// Recycled slots.
    pub(crate) free: Vec<u32>,

    pub(crate) layers: Vec<Layer>,
    pub(crate) entry_point: Option<u32>,

    rng: StdRng,
    dirty: bool,
    mutations: u64,
}

impl VaultIndex {
    /// Create an empty index.
    pub fn new(
        dimension: usize,
        capacity: usize,
        metric: DistanceMetric,
        params: GraphParams,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(VaultError::InvalidParameter(
                "dimension must be positive".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(VaultError::InvalidParameter(
                "capacity must be positive".to_string(),
            ));
        }
        params.validate()?;
        Ok(Self {
            dimension,
            capacity,
            metric,
            rng: StdRng::seed_from_u64(params.level_seed),
            params,
            vectors: Vec::new(),
            levels: Vec::new(),
            live: Vec::new(),
            slot_ids: Vec::new(),
            metas: Vec::new(),
            id_to_slot: HashMap::new(),
            free: Vec::new(),
            layers: Vec::new(),
            entry_point: None,
            dirty: false,
            mutations: 0,
        })
    }

    /// Reassemble an index from snapshot parts.
    ///
    /// The caller (the snapshot decoder) guarantees internal consistency;
    /// the restored index starts clean with a fresh level RNG.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        dimension: usize,
        capacity: usize,
        metric: DistanceMetric,
        params: GraphParams,
        vectors: Vec<f32>,
        levels: Vec<u8>,
        live: Vec<bool>,
        slot_ids: Vec<u64>,
        metas: Vec<MemoryMetadata>,
        free: Vec<u32>,
        layers: Vec<Layer>,
        entry_point: Option<u32>,
    ) -> Self {
        let id_to_slot = slot_ids
            .iter()
            .enumerate()
            .filter(|&(slot, _)| live[slot])
            .map(|(slot, &id)| (id, slot as u32))
            .collect();
        Self {
            dimension,
            capacity,
            metric,
            rng: StdRng::seed_from_u64(params.level_seed),
            params,
            vectors,
            levels,
            live,
            slot_ids,
            metas,
            id_to_slot,
            free,
            layers,
            entry_point,
            dirty: false,
            mutations: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[inline]
    pub fn params(&self) -> &GraphParams {
        &self.params
    }

    /// Number of layers currently materialized.
    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// External id of the current entry point, if any.
    pub fn entry_id(&self) -> Option<u64> {
        self.entry_point.map(|slot| self.slot_ids[slot as usize])
    }

    /// Whether the index has mutated since the last successful snapshot.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Monotone counter bumped on every mutation; the snapshot save
    /// protocol compares it before and after serializing.
    #[inline]
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    /// Clear the dirty flag, but only if no mutation arrived since
    /// `observed` was read. Returns whether the flag was cleared.
    pub fn mark_clean(&mut self, observed: u64) -> bool {
        if self.mutations == observed {
            self.dirty = false;
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.mutations += 1;
    }

    /// Insert an entry. Replaces any existing entry with the same id.
    ///
    /// Fails with `DimensionMismatch` or `CapacityExceeded` before any
    /// mutation takes place.
    pub fn insert(&mut self, id: u64, embedding: Vec<f32>, metadata: MemoryMetadata) -> Result<()> {
        construction::insert_entry(self, id, embedding, metadata)
    }

    /// Remove an entry from every layer. Returns whether it existed.
    pub fn remove(&mut self, id: u64) -> bool {
        let Some(slot) = self.id_to_slot.remove(&id) else {
            return false;
        };
        let level = self.levels[slot as usize] as usize;
        for l in 0..=level.min(self.layers.len().saturating_sub(1)) {
            let neighbors: Vec<u32> = self.layers[l].links[slot as usize].to_vec();
            for n in neighbors {
                self.layers[l].links[n as usize].retain(|&mut x| x != slot);
            }
            self.layers[l].links[slot as usize].clear();
        }
        self.live[slot as usize] = false;
        self.free.push(slot);

        if self.id_to_slot.is_empty() {
            self.layers.clear();
            self.entry_point = None;
        } else {
            let top = self.max_live_level() as usize;
            self.layers.truncate(top + 1);
            let entry_invalid = match self.entry_point {
                Some(ep) => ep == slot || !self.live[ep as usize],
                None => true,
            };
            if entry_invalid || self.levels_of_entry() < top {
                self.repair_entry_point();
            }
        }
        debug!(id, "removed entry");
        self.mark_dirty();
        true
    }

    /// k-nearest-neighbor search. Returns `[]` on an empty index.
    ///
    /// `ef` defaults to the index's `ef_search_default`; the effective
    /// working set is `max(ef, k)`. An expired `deadline` yields the
    /// best-effort partial top-k instead of an error.
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        ef: Option<usize>,
        deadline: Option<Deadline>,
    ) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(VaultError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let ef = ef.unwrap_or(self.params.ef_search_default);
        Ok(search::knn(self, query, k, ef, deadline))
    }

    /// Brute-force exact k-NN; ground truth for tests and benches.
    pub fn exact_knn(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(VaultError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let mut hits: Vec<Neighbor> = self
            .id_to_slot
            .iter()
            .map(|(&id, &slot)| Neighbor {
                id,
                distance: self.metric.distance(query, self.vector(slot)),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        hits.truncate(k);
        Ok(hits)
    }

    /// Metadata for an id, if present.
    pub fn metadata(&self, id: u64) -> Option<&MemoryMetadata> {
        self.id_to_slot
            .get(&id)
            .map(|&slot| &self.metas[slot as usize])
    }

    /// Replace an entry's metadata; embedding and level stay fixed.
    /// Bumps `updated_at` and the dirty flag. Returns whether the id exists.
    pub fn update_metadata(&mut self, id: u64, mut metadata: MemoryMetadata) -> Result<bool> {
        metadata.validate()?;
        let Some(&slot) = self.id_to_slot.get(&id) else {
            return Ok(false);
        };
        metadata.updated_at = metadata.updated_at.max(now_secs());
        self.metas[slot as usize] = metadata;
        self.mark_dirty();
        Ok(true)
    }

    /// Stored embedding for an id.
    pub fn embedding(&self, id: u64) -> Option<&[f32]> {
        self.id_to_slot.get(&id).map(|&slot| self.vector(slot))
    }

    /// Iterate over live external ids.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.id_to_slot.keys().copied()
    }

    #[inline]
    pub(crate) fn vector(&self, slot: u32) -> &[f32] {
        let start = slot as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    #[inline]
    pub(crate) fn distance_to(&self, query: &[f32], slot: u32) -> f32 {
        self.metric.distance(query, self.vector(slot))
    }

    /// Geometric level draw: `floor(-ln(U) * ml)`, `U` uniform on (0, 1].
    pub(crate) fn draw_level(&mut self) -> u8 {
        let u: f64 = 1.0 - self.rng.random::<f64>();
        let level = (-u.ln() * self.params.ml).floor();
        (level as i64).clamp(0, MAX_LEVEL as i64) as u8
    }

    /// Claim a slot (recycled or fresh) and store the entry into it.
    pub(crate) fn alloc_slot(
        &mut self,
        id: u64,
        embedding: &[f32],
        metadata: MemoryMetadata,
        level: u8,
    ) -> u32 {
        let slot = if let Some(slot) = self.free.pop() {
            let start = slot as usize * self.dimension;
            self.vectors[start..start + self.dimension].copy_from_slice(embedding);
            self.levels[slot as usize] = level;
            self.live[slot as usize] = true;
            self.slot_ids[slot as usize] = id;
            self.metas[slot as usize] = metadata;
            slot
        } else {
            let slot = self.levels.len() as u32;
            self.vectors.extend_from_slice(embedding);
            self.levels.push(level);
            self.live.push(true);
            self.slot_ids.push(id);
            self.metas.push(metadata);
            slot
        };
        self.id_to_slot.insert(id, slot);
        for layer in &mut self.layers {
            layer.ensure_slot(slot);
        }
        slot
    }

    /// Grow the layer stack so `level` exists, covering every slot.
    pub(crate) fn ensure_layers(&mut self, level: u8) {
        let slots = self.levels.len();
        while self.layers.len() <= level as usize {
            self.layers.push(Layer::with_slots(slots));
        }
    }

    pub(crate) fn max_live_level(&self) -> u8 {
        self.id_to_slot
            .values()
            .map(|&slot| self.levels[slot as usize])
            .max()
            .unwrap_or(0)
    }

    fn levels_of_entry(&self) -> usize {
        self.entry_point
            .map(|ep| self.levels[ep as usize] as usize)
            .unwrap_or(0)
    }

    /// Rescan the highest non-empty layer for a replacement entry point.
    ///
    /// Lowest live slot wins so repair is deterministic.
    pub(crate) fn repair_entry_point(&mut self) {
        let top = self.layers.len().saturating_sub(1) as u8;
        let replacement = self
            .id_to_slot
            .values()
            .copied()
            .filter(|&slot| self.levels[slot as usize] >= top)
            .min();
        self.entry_point = replacement;
        debug!(entry = ?self.entry_point, top_layer = top, "repaired entry point");
    }
}

impl std::fmt::Debug for VaultIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultIndex")
            .field("dimension", &self.dimension)
            .field("capacity", &self.capacity)
            .field("metric", &self.metric)
            .field("size", &self.len())
            .field("layers", &self.layers.len())
            .field("entry_point", &self.entry_point)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(dim: usize) -> VaultIndex {
        VaultIndex::new(dim, 1_000, DistanceMetric::Cosine, GraphParams::default()).unwrap()
    }

    #[test]
    fn empty_index_searches_empty() {
        let idx = index(4);
        let hits = idx.knn(&[1.0, 0.0, 0.0, 0.0], 5, None, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn first_insert_becomes_entry_point() {
        let mut idx = index(2);
        idx.insert(7, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        assert_eq!(idx.entry_id(), Some(7));
        assert_eq!(idx.len(), 1);
        assert!(idx.is_dirty());
    }

    #[test]
    fn rejects_wrong_dimension_without_mutation() {
        let mut idx = index(2);
        let err = idx
            .insert(1, vec![1.0, 0.0, 0.0], MemoryMetadata::default())
            .unwrap_err();
        assert!(matches!(err, VaultError::DimensionMismatch { .. }));
        assert_eq!(idx.len(), 0);
        assert!(!idx.is_dirty());
    }

    #[test]
    fn rejects_at_capacity() {
        let mut idx =
            VaultIndex::new(2, 2, DistanceMetric::Cosine, GraphParams::default()).unwrap();
        idx.insert(1, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        idx.insert(2, vec![0.0, 1.0], MemoryMetadata::default())
            .unwrap();
        let err = idx
            .insert(3, vec![1.0, 1.0], MemoryMetadata::default())
            .unwrap_err();
        assert!(matches!(err, VaultError::CapacityExceeded { .. }));
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn upsert_replaces_existing_id() {
        let mut idx = index(2);
        idx.insert(1, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        idx.insert(1, vec![0.0, 1.0], MemoryMetadata::default())
            .unwrap();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.embedding(1).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn remove_clears_all_layers_and_repairs_entry() {
        let mut idx = index(2);
        for i in 0..20u64 {
            let angle = i as f32 * 0.1;
            idx.insert(i, vec![angle.cos(), angle.sin()], MemoryMetadata::default())
                .unwrap();
        }
        let entry = idx.entry_id().unwrap();
        assert!(idx.remove(entry));
        assert_eq!(idx.len(), 19);
        assert!(idx.entry_id().is_some());
        assert_ne!(idx.entry_id(), Some(entry));

        let hits = idx.knn(&[1.0, 0.0], 19, Some(64), None).unwrap();
        assert!(hits.iter().all(|h| h.id != entry));
    }

    #[test]
    fn remove_last_entry_empties_layers() {
        let mut idx = index(2);
        idx.insert(1, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        assert!(idx.remove(1));
        assert!(!idx.remove(1));
        assert_eq!(idx.num_layers(), 0);
        assert_eq!(idx.entry_id(), None);
        assert!(idx.knn(&[1.0, 0.0], 3, None, None).unwrap().is_empty());
    }

    #[test]
    fn slots_are_recycled() {
        let mut idx = index(2);
        idx.insert(1, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        idx.insert(2, vec![0.0, 1.0], MemoryMetadata::default())
            .unwrap();
        idx.remove(1);
        idx.insert(3, vec![0.5, 0.5], MemoryMetadata::default())
            .unwrap();
        // Two live entries in two slots: the freed slot was reused.
        assert_eq!(idx.levels.len(), 2);
    }

    #[test]
    fn mark_clean_detects_concurrent_mutation() {
        let mut idx = index(2);
        idx.insert(1, vec![1.0, 0.0], MemoryMetadata::default())
            .unwrap();
        let observed = idx.mutation_count();
        idx.insert(2, vec![0.0, 1.0], MemoryMetadata::default())
            .unwrap();
        assert!(!idx.mark_clean(observed));
        assert!(idx.is_dirty());
        assert!(idx.mark_clean(idx.mutation_count()));
        assert!(!idx.is_dirty());
    }

    #[test]
    fn level_draw_is_bounded_and_deterministic() {
        let mut a = index(2);
        let mut b = index(2);
        let levels_a: Vec<u8> = (0..100).map(|_| a.draw_level()).collect();
        let levels_b: Vec<u8> = (0..100).map(|_| b.draw_level()).collect();
        assert_eq!(levels_a, levels_b);
        assert!(levels_a.iter().all(|&l| l <= MAX_LEVEL));
        // Geometric with ml = 1/ln(16): the bulk of draws land on level 0.
        assert!(levels_a.iter().filter(|&&l| l == 0).count() > 50);
    }
}
