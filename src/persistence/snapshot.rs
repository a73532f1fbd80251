//! Whole-index snapshot codec.
//!
//! A snapshot is a 5-byte header (magic + version) followed by a postcard
//! payload carrying everything needed for exact reconstruction: params,
//! metric, the full layer/adjacency structure, slot table (including the
//! free list, so slot numbering survives the round trip), entry point, and
//! the complete id → (embedding, metadata) mapping.
//!
//! Format changes bump `SNAPSHOT_VERSION`; decoding rejects unknown
//! versions rather than guessing.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::distance::DistanceMetric;
use crate::graph::{GraphParams, Layer, VaultIndex};
use crate::metadata::MemoryMetadata;
use crate::persistence::error::{PersistenceError, PersistenceResult};

const MAGIC: [u8; 4] = *b"STRA";
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    dimension: u32,
    capacity: u64,
    metric: DistanceMetric,
    m: u32,
    ef_construction: u32,
    ef_search_default: u32,
    ml: f64,
    level_seed: u64,

    /// Slot-ordered tables; dead slots keep placeholder entries so slot
    /// numbering is preserved exactly.
    vectors: Vec<f32>,
    levels: Vec<u8>,
    live: Vec<bool>,
    slot_ids: Vec<u64>,
    metas: Vec<MemoryMetadata>,
    free: Vec<u32>,

    /// Per layer, per slot: neighbor list.
    layers: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
}

/// Serialize an index into an opaque snapshot blob.
pub fn encode_index(index: &VaultIndex) -> PersistenceResult<Vec<u8>> {
    let payload = SnapshotPayload {
        dimension: index.dimension as u32,
        capacity: index.capacity as u64,
        metric: index.metric,
        m: index.params.m as u32,
        ef_construction: index.params.ef_construction as u32,
        ef_search_default: index.params.ef_search_default as u32,
        ml: index.params.ml,
        level_seed: index.params.level_seed,
        vectors: index.vectors.clone(),
        levels: index.levels.clone(),
        live: index.live.clone(),
        slot_ids: index.slot_ids.clone(),
        metas: index.metas.clone(),
        free: index.free.clone(),
        layers: index
            .layers
            .iter()
            .map(|layer| layer.links.iter().map(|l| l.to_vec()).collect())
            .collect(),
        entry_point: index.entry_point,
    };

    let mut blob = Vec::with_capacity(64 + payload.vectors.len() * 4);
    blob.extend_from_slice(&MAGIC);
    blob.push(SNAPSHOT_VERSION);
    let body = postcard::to_allocvec(&payload)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    blob.extend_from_slice(&body);
    Ok(blob)
}

/// Reconstruct an index from a snapshot blob.
pub fn decode_index(blob: &[u8]) -> PersistenceResult<VaultIndex> {
    if blob.len() < 5 {
        return Err(PersistenceError::Format(format!(
            "snapshot truncated: {} bytes",
            blob.len()
        )));
    }
    if blob[0..4] != MAGIC {
        return Err(PersistenceError::Format(
            "bad magic bytes: not a strata snapshot".to_string(),
        ));
    }
    let version = blob[4];
    if version != SNAPSHOT_VERSION {
        return Err(PersistenceError::Format(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }

    let payload: SnapshotPayload = postcard::from_bytes(&blob[5..])
        .map_err(|e| PersistenceError::Deserialization(e.to_string()))?;

    let slots = payload.levels.len();
    let dimension = payload.dimension as usize;
    if payload.vectors.len() != slots * dimension
        || payload.live.len() != slots
        || payload.slot_ids.len() != slots
        || payload.metas.len() != slots
    {
        return Err(PersistenceError::Deserialization(
            "snapshot slot tables disagree on length".to_string(),
        ));
    }
    for layer in &payload.layers {
        if layer.len() != slots {
            return Err(PersistenceError::Deserialization(
                "snapshot layer table does not cover every slot".to_string(),
            ));
        }
    }
    if let Some(ep) = payload.entry_point {
        if ep as usize >= slots {
            return Err(PersistenceError::Deserialization(format!(
                "entry point {ep} out of range"
            )));
        }
    }

    let params = GraphParams {
        m: payload.m as usize,
        ef_construction: payload.ef_construction as usize,
        ef_search_default: payload.ef_search_default as usize,
        ml: payload.ml,
        level_seed: payload.level_seed,
    };
    let layers = payload
        .layers
        .into_iter()
        .map(|layer| Layer {
            links: layer
                .into_iter()
                .map(|l| l.into_iter().collect::<SmallVec<[u32; 16]>>())
                .collect(),
        })
        .collect();

    Ok(VaultIndex::from_parts(
        dimension,
        payload.capacity as usize,
        payload.metric,
        params,
        payload.vectors,
        payload.levels,
        payload.live,
        payload.slot_ids,
        payload.metas,
        payload.free,
        layers,
        payload.entry_point,
    ))
}
