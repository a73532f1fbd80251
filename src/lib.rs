//! strata: in-process approximate nearest-neighbor memory search.
//!
//! One layered proximity-graph index per owner key, with a multi-factor
//! relevance ranking layer on top of raw similarity:
//!
//! - `graph/`: layered graph construction and search (the ANN core)
//! - `scoring`: similarity + metadata signals → explainable [0, 1] score
//! - `query`: search modes, post-filters, diversity re-ranking
//! - `cluster`: seeded k-means for diversity insight and result tagging
//! - `scheduler`: per-owner FIFO batching of graph mutations
//! - `persistence`: whole-index snapshots through a blob-store seam
//! - `store`: the owner-keyed facade tying it all together
//!
//! # Why approximate
//!
//! Exact k-NN over a growing collection is O(n·d) per query. The layered
//! graph answers in roughly logarithmic time by navigating sparse
//! long-range layers down to a dense base layer, trading a bounded amount
//! of recall for latency. The `ef` knobs move along that tradeoff: wider
//! beams cost more and miss less, with no hard correctness guarantee.
//! That is the design, not a bug.
//!
//! # Usage
//!
//! ```rust
//! use strata::{MemoryVault, SearchQuery, VaultConfig};
//!
//! # fn main() -> strata::Result<()> {
//! let mut vault = MemoryVault::new(VaultConfig::new(2));
//!
//! vault.insert("alice", 1, vec![1.0, 0.0], None)?;
//! vault.insert("alice", 2, vec![0.0, 1.0], None)?;
//!
//! let results = vault.search("alice", &SearchQuery::new(vec![1.0, 0.0], 1))?;
//! assert_eq!(results[0].id, 1);
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod distance;
pub mod error;
pub mod graph;
pub mod metadata;
pub mod persistence;
pub mod provider;
pub mod query;
pub mod scheduler;
pub mod scoring;
pub mod simd;
pub mod store;

// Re-exports
pub use cluster::{Cluster, ClusterInfo, ClusterReport};
pub use distance::DistanceMetric;
pub use error::{Result, VaultError};
pub use graph::{Deadline, GraphParams, Neighbor, VaultIndex};
pub use metadata::MemoryMetadata;
pub use persistence::{BlobStore, FileBlobStore, MemoryBlobStore, PersistenceError};
pub use provider::{EmbeddingProvider, ProviderError};
pub use query::{SearchMode, SearchQuery};
pub use scheduler::{BatchConfig, BatchScheduler};
pub use store::{MemoryVault, OwnerStats, RankedResult, VaultConfig};
