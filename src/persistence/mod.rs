//! Snapshot persistence for vault indexes.
//!
//! An index persists as a single opaque blob: the snapshot codec
//! (`snapshot`) turns the whole graph into bytes, and a [`BlobStore`]
//! backend decides where those bytes live. Saves follow a dirty-flag
//! protocol driven by the facade: the flag clears only after a
//! successful serialize, and any mutation that lands mid-save re-raises
//! it so the next save is not skipped.

pub mod blob_store;
mod error;
pub mod snapshot;

pub use blob_store::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use error::{PersistenceError, PersistenceResult};
pub use snapshot::{decode_index, encode_index, SNAPSHOT_VERSION};
