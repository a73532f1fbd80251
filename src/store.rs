//! Owner-keyed vault facade.
//!
//! One [`VaultIndex`] per owner key, held in an explicit map with explicit
//! create/drop lifecycle, never an ambient singleton. All mutations for
//! an owner route through the [`BatchScheduler`], so there is exactly one
//! logical writer per index; searches drain the owner's pending batch
//! first and therefore always read their own writes.
//!
//! Persistence is whole-snapshot: `flush` serializes through the
//! configured [`BlobStore`] under the dirty-flag protocol, `load` replaces
//! the in-memory index from the stored blob and then re-applies any
//! pending inserts on top.

use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::{self, ClusterInfo};
use crate::distance::DistanceMetric;
use crate::error::{Result, VaultError};
use crate::graph::{Deadline, GraphParams, VaultIndex};
use crate::metadata::{now_secs, MemoryMetadata};
use crate::persistence::{decode_index, encode_index, BlobStore, PersistenceError};
use crate::provider::EmbeddingProvider;
use crate::query::{self, SearchQuery};
use crate::scheduler::{BatchConfig, BatchScheduler};
use crate::scoring;

/// Vault-wide configuration; every owner's index is built from it.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub dimension: usize,
    /// Max live entries per owner.
    pub capacity: usize,
    pub metric: DistanceMetric,
    pub graph: GraphParams,
    pub batch: BatchConfig,
    /// Seed for result clustering; fixed for deterministic reports.
    pub cluster_seed: u64,
}

impl VaultConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            capacity: 100_000,
            metric: DistanceMetric::Cosine,
            graph: GraphParams::default(),
            batch: BatchConfig::default(),
            cluster_seed: 0x1b2f_c4d7,
        }
    }
}

/// One ranked search hit.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub id: u64,
    /// Raw similarity under the index metric.
    pub similarity: f32,
    /// Multi-factor score in [0, 1]; results are ranked by this.
    pub relevance_score: f32,
    pub metadata: MemoryMetadata,
    pub cluster_info: Option<ClusterInfo>,
}

/// Per-owner observability snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerStats {
    pub size: usize,
    /// Inserts queued but not yet applied.
    pub pending: usize,
    pub layers: usize,
    pub entry_id: Option<u64>,
    pub avg_search_latency_ms: f64,
    /// Unix seconds of the last batch apply or snapshot load.
    pub last_optimized_at: Option<u64>,
}

struct OwnerSlot {
    index: VaultIndex,
    search_total_ms: f64,
    search_count: u64,
    last_optimized_at: Option<u64>,
}

impl OwnerSlot {
    fn new(index: VaultIndex) -> Self {
        Self {
            index,
            search_total_ms: 0.0,
            search_count: 0,
            last_optimized_at: None,
        }
    }
}

/// In-process vector memory store: one ANN index per owner.
pub struct MemoryVault {
    config: VaultConfig,
    owners: HashMap<String, OwnerSlot>,
    scheduler: BatchScheduler,
    provider: Option<Box<dyn EmbeddingProvider>>,
    blobs: Option<Box<dyn BlobStore>>,
}

impl MemoryVault {
    pub fn new(config: VaultConfig) -> Self {
        let scheduler = BatchScheduler::new(config.batch.clone());
        Self {
            config,
            owners: HashMap::new(),
            scheduler,
            provider: None,
            blobs: None,
        }
    }

    /// Attach an embedding provider for `insert_text`/`search_text`.
    #[must_use]
    pub fn with_provider(mut self, provider: Box<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Attach a blob store backend for `flush`/`load`.
    #[must_use]
    pub fn with_blob_store(mut self, blobs: Box<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    /// Explicitly create an owner's index. Idempotent; `insert` also
    /// creates on first use.
    pub fn create_owner(&mut self, owner: &str) -> Result<()> {
        if !self.owners.contains_key(owner) {
            let index = VaultIndex::new(
                self.config.dimension,
                self.config.capacity,
                self.config.metric,
                self.config.graph.clone(),
            )?;
            self.owners.insert(owner.to_string(), OwnerSlot::new(index));
            debug!(owner, "created owner index");
        }
        Ok(())
    }

    /// Tear down an owner's index and discard its pending batch.
    pub fn drop_owner(&mut self, owner: &str) -> bool {
        self.scheduler.forget(owner);
        self.owners.remove(owner).is_some()
    }

    /// Number of owners with a live index.
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Queue an insert for an owner, creating the index on first use.
    ///
    /// Contract violations (dimension, capacity, bad metadata) reject
    /// immediately with no mutation. The entry lands in the graph when
    /// its batch drains; searches for this owner drain first, so the
    /// write is always visible to the caller's next search.
    pub fn insert(
        &mut self,
        owner: &str,
        id: u64,
        embedding: Vec<f32>,
        metadata: Option<MemoryMetadata>,
    ) -> Result<()> {
        self.create_owner(owner)?;
        let Some(slot) = self.owners.get(owner) else {
            return Err(VaultError::OwnerNotFound(owner.to_string()));
        };

        if embedding.len() != self.config.dimension {
            return Err(VaultError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.len(),
            });
        }
        let metadata = metadata.unwrap_or_default();
        metadata.validate()?;

        let is_upsert = slot.index.embedding(id).is_some();
        if !is_upsert && slot.index.len() + self.scheduler.pending(owner) >= self.config.capacity {
            return Err(VaultError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let count_full = self.scheduler.enqueue(owner, id, embedding, metadata);
        if count_full || self.scheduler.ready(owner, Instant::now()) {
            self.drain_owner(owner);
        }
        Ok(())
    }

    /// Embed `text` through the configured provider, then insert.
    pub fn insert_text(
        &mut self,
        owner: &str,
        id: u64,
        text: &str,
        metadata: Option<MemoryMetadata>,
    ) -> Result<()> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            VaultError::InvalidParameter("no embedding provider configured".to_string())
        })?;
        let embedding = provider.embed(text)?;
        self.insert(owner, id, embedding, metadata)
    }

    /// Apply any batches that hit their age threshold. Hosts with a tick
    /// loop call this periodically; everything else drains on demand.
    pub fn maintain(&mut self) {
        let due = self.scheduler.drain_due(Instant::now());
        for (owner, batch) in due {
            self.apply_batch(&owner, batch);
        }
    }

    /// Ranked search over one owner's index. Unknown owners and empty
    /// indexes return `[]`, never an error.
    pub fn search(&mut self, owner: &str, query: &SearchQuery) -> Result<Vec<RankedResult>> {
        self.search_with_deadline(owner, query, None)
    }

    /// Ranked search with an external deadline; on expiry the result is
    /// the best-effort ranking of candidates gathered so far.
    pub fn search_with_deadline(
        &mut self,
        owner: &str,
        query: &SearchQuery,
        deadline: Option<Deadline>,
    ) -> Result<Vec<RankedResult>> {
        if !self.owners.contains_key(owner) && self.scheduler.pending(owner) == 0 {
            return Ok(Vec::new());
        }
        self.create_owner(owner)?;
        self.drain_owner(owner);

        let started = Instant::now();
        let Some(slot) = self.owners.get(owner) else {
            return Ok(Vec::new());
        };
        let index = &slot.index;

        let plan = query::plan(query, index.params().ef_search_default);
        let hits = index.knn(&query.vector, plan.fetch_k, Some(plan.ef), deadline)?;

        let now = now_secs();
        let mut candidates: Vec<RankedResult> = Vec::with_capacity(hits.len());
        for hit in hits {
            // Both lookups hold for every id the graph hands back; a miss
            // would be invariant drift, handled by skipping, not panicking.
            let Some(metadata) = index.metadata(hit.id).cloned() else {
                continue;
            };
            if !query::matches_filters(query, &metadata) {
                continue;
            }
            let Some(doc_vector) = index.embedding(hit.id) else {
                continue;
            };
            let similarity = index.metric().similarity(hit.distance);
            let relevance_score =
                scoring::relevance_score(similarity, &metadata, query, doc_vector, now);
            if query.threshold.is_some_and(|t| relevance_score < t) {
                continue;
            }
            candidates.push(RankedResult {
                id: hit.id,
                similarity,
                relevance_score,
                metadata,
                cluster_info: None,
            });
        }

        candidates.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then(b.similarity.total_cmp(&a.similarity))
                .then(a.id.cmp(&b.id))
        });

        let mut results = if query.diversity_factor > 0.0 {
            // Keep positions aligned with `candidates`; a missing
            // embedding (invariant drift) scores as maximally diverse.
            let embeddings: Vec<&[f32]> = candidates
                .iter()
                .map(|c| index.embedding(c.id).unwrap_or(&[]))
                .collect();
            let picked = query::diversify(&embeddings, query.diversity_factor, query.k);
            let mut by_pick: Vec<RankedResult> = Vec::with_capacity(picked.len());
            for i in picked {
                by_pick.push(candidates[i].clone());
            }
            by_pick
        } else {
            candidates.truncate(query.k);
            candidates
        };

        if query.with_clusters && results.len() >= 2 {
            self.attach_clusters(owner, &mut results);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        if let Some(slot) = self.owners.get_mut(owner) {
            slot.search_total_ms += elapsed_ms;
            slot.search_count += 1;
        }

        Ok(results)
    }

    /// Embed `text` and run a ranked search with it (the text also feeds
    /// the topic-overlap bonus).
    pub fn search_text(
        &mut self,
        owner: &str,
        text: &str,
        mut query: SearchQuery,
    ) -> Result<Vec<RankedResult>> {
        let provider = self.provider.as_ref().ok_or_else(|| {
            VaultError::InvalidParameter("no embedding provider configured".to_string())
        })?;
        query.vector = provider.embed(text)?;
        query.text = Some(text.to_string());
        self.search(owner, &query)
    }

    /// Remove an entry. `Ok(false)` when the id is unknown; an unknown
    /// owner is an error.
    pub fn remove(&mut self, owner: &str, id: u64) -> Result<bool> {
        if !self.owners.contains_key(owner) {
            return Err(VaultError::OwnerNotFound(owner.to_string()));
        }
        self.drain_owner(owner);
        match self.owners.get_mut(owner) {
            Some(slot) => Ok(slot.index.remove(id)),
            None => Ok(false),
        }
    }

    /// Replace an entry's metadata without touching the graph.
    pub fn update_metadata(
        &mut self,
        owner: &str,
        id: u64,
        metadata: MemoryMetadata,
    ) -> Result<bool> {
        if !self.owners.contains_key(owner) {
            return Err(VaultError::OwnerNotFound(owner.to_string()));
        }
        self.drain_owner(owner);
        match self.owners.get_mut(owner) {
            Some(slot) => slot.index.update_metadata(id, metadata),
            None => Ok(false),
        }
    }

    /// Per-owner stats.
    pub fn stats(&self, owner: &str) -> Result<OwnerStats> {
        let slot = self
            .owners
            .get(owner)
            .ok_or_else(|| VaultError::OwnerNotFound(owner.to_string()))?;
        let avg = if slot.search_count == 0 {
            0.0
        } else {
            slot.search_total_ms / slot.search_count as f64
        };
        Ok(OwnerStats {
            size: slot.index.len(),
            pending: self.scheduler.pending(owner),
            layers: slot.index.num_layers(),
            entry_id: slot.index.entry_id(),
            avg_search_latency_ms: avg,
            last_optimized_at: slot.last_optimized_at,
        })
    }

    /// Serialize the owner's index to the blob store. Returns the blob
    /// reference. The dirty flag clears only if no mutation landed while
    /// serializing; callers must await completion before assuming
    /// durability.
    pub fn flush(&mut self, owner: &str) -> Result<String> {
        if !self.owners.contains_key(owner) {
            return Err(VaultError::OwnerNotFound(owner.to_string()));
        }
        if self.blobs.is_none() {
            return Err(VaultError::Persistence(PersistenceError::NotSupported(
                "no blob store configured".to_string(),
            )));
        }
        self.drain_owner(owner);

        let Some(slot) = self.owners.get(owner) else {
            return Err(VaultError::OwnerNotFound(owner.to_string()));
        };
        let observed = slot.index.mutation_count();
        let blob = encode_index(&slot.index).map_err(VaultError::Persistence)?;
        let Some(blobs) = self.blobs.as_ref() else {
            return Err(VaultError::Persistence(PersistenceError::NotSupported(
                "no blob store configured".to_string(),
            )));
        };
        blobs
            .put(owner.as_bytes(), &blob)
            .map_err(VaultError::Persistence)?;

        let mut cleared = false;
        if let Some(slot) = self.owners.get_mut(owner) {
            cleared = slot.index.mark_clean(observed);
        }
        info!(
            owner,
            bytes = blob.len(),
            cleared,
            "flushed index snapshot"
        );
        Ok(hex::encode(owner.as_bytes()))
    }

    /// Replace the owner's in-memory index from its stored snapshot, then
    /// re-apply any pending (newer) inserts on top.
    pub fn load(&mut self, owner: &str) -> Result<()> {
        let blobs = self.blobs.as_ref().ok_or_else(|| {
            VaultError::Persistence(PersistenceError::NotSupported(
                "no blob store configured".to_string(),
            ))
        })?;
        let blob = blobs
            .get(owner.as_bytes())
            .map_err(VaultError::Persistence)?
            .ok_or_else(|| {
                VaultError::Persistence(PersistenceError::NotFound(owner.to_string()))
            })?;
        let index = decode_index(&blob).map_err(VaultError::Persistence)?;
        info!(owner, size = index.len(), "loaded index snapshot");

        let mut slot = OwnerSlot::new(index);
        slot.last_optimized_at = Some(now_secs());
        self.owners.insert(owner.to_string(), slot);
        self.drain_owner(owner);
        Ok(())
    }

    fn drain_owner(&mut self, owner: &str) {
        let batch = self.scheduler.drain(owner);
        self.apply_batch(owner, batch);
    }

    fn apply_batch(&mut self, owner: &str, batch: Vec<crate::scheduler::PendingInsert>) {
        if batch.is_empty() {
            return;
        }
        let Some(slot) = self.owners.get_mut(owner) else {
            warn!(owner, dropped = batch.len(), "batch for unknown owner");
            return;
        };
        let mut applied = 0usize;
        let mut errors = 0usize;
        for entry in batch {
            match slot.index.insert(entry.id, entry.embedding, entry.metadata) {
                Ok(()) => applied += 1,
                Err(e) => {
                    errors += 1;
                    warn!(owner, id = entry.id, error = %e, "batched insert failed");
                }
            }
        }
        slot.last_optimized_at = Some(now_secs());
        debug!(owner, applied, errors, "applied insert batch");
    }

    fn attach_clusters(&self, owner: &str, results: &mut [RankedResult]) {
        let Some(slot) = self.owners.get(owner) else {
            return;
        };
        let vectors: Vec<Vec<f32>> = results
            .iter()
            .filter_map(|r| slot.index.embedding(r.id).map(<[f32]>::to_vec))
            .collect();
        if vectors.len() != results.len() {
            return;
        }
        let k = ((vectors.len() as f64).sqrt().ceil() as usize).clamp(1, vectors.len());
        match cluster::kmeans(&vectors, k, self.config.cluster_seed) {
            Ok(report) => {
                for c in &report.clusters {
                    for &member in &c.members {
                        results[member].cluster_info = Some(ClusterInfo {
                            cluster_id: c.cluster_id,
                            cohesion: c.cohesion,
                        });
                    }
                }
            }
            Err(e) => warn!(owner, error = %e, "result clustering failed"),
        }
    }
}
