//! Blob storage backends for index snapshots.
//!
//! Snapshots are opaque byte blobs stored by key; the trait keeps the
//! index core independent of where they land (local disk here; a remote
//! encrypted store is the same trait implemented elsewhere).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::persistence::error::{PersistenceError, PersistenceResult};

/// Trait for blob storage backends.
///
/// Blobs are arbitrary byte sequences stored by key; keys are typically
/// owner keys or content hashes.
pub trait BlobStore: Send + Sync {
    /// Store a blob under `key`, replacing any previous value.
    fn put(&self, key: &[u8], blob: &[u8]) -> PersistenceResult<()>;

    /// Retrieve a blob. `Ok(None)` when the key has never been stored.
    fn get(&self, key: &[u8]) -> PersistenceResult<Option<Vec<u8>>>;

    /// Delete a blob. Deleting a missing key is not an error.
    fn delete(&self, key: &[u8]) -> PersistenceResult<()>;

    /// Check if a blob exists.
    fn exists(&self, key: &[u8]) -> PersistenceResult<bool> {
        self.get(key).map(|opt| opt.is_some())
    }
}

/// File-based blob storage.
///
/// Stores blobs as individual files under a two-level hex directory
/// structure (`a1/b2/a1b2c3...`) so large owner counts do not pile every
/// snapshot into one directory. Writes are atomic: write to a temp file,
/// then rename.
pub struct FileBlobStore {
    base_path: PathBuf,
}

impl FileBlobStore {
    /// Create a file-backed store rooted at `base_path`.
    pub fn new<P: AsRef<Path>>(base_path: P) -> PersistenceResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path).map_err(PersistenceError::Io)?;
        Ok(Self { base_path })
    }

    fn key_to_path(&self, key: &[u8]) -> PathBuf {
        let hex_key = hex::encode(key);
        if hex_key.len() >= 4 {
            let dir1 = &hex_key[0..2];
            let dir2 = &hex_key[2..4];
            self.base_path.join(dir1).join(dir2).join(&hex_key)
        } else {
            self.base_path.join(&hex_key)
        }
    }
}

impl BlobStore for FileBlobStore {
    fn put(&self, key: &[u8], blob: &[u8]) -> PersistenceResult<()> {
        let path = self.key_to_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(PersistenceError::Io)?;
        }
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, blob).map_err(PersistenceError::Io)?;
        std::fs::rename(&temp_path, &path).map_err(PersistenceError::Io)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> PersistenceResult<Option<Vec<u8>>> {
        let path = self.key_to_path(key);
        match std::fs::read(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }

    fn delete(&self, key: &[u8]) -> PersistenceResult<()> {
        let path = self.key_to_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::Io(e)),
        }
    }
}

/// In-memory blob storage, for tests and ephemeral hosts.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &[u8], blob: &[u8]) -> PersistenceResult<()> {
        self.blobs
            .lock()
            .expect("blob map lock poisoned")
            .insert(key.to_vec(), blob.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> PersistenceResult<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .expect("blob map lock poisoned")
            .get(key)
            .cloned())
    }

    fn delete(&self, key: &[u8]) -> PersistenceResult<()> {
        self.blobs
            .lock()
            .expect("blob map lock poisoned")
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(temp_dir.path()).unwrap();

        let key = b"owner:alice";
        let blob = b"snapshot bytes";

        store.put(key, blob).unwrap();
        assert_eq!(store.get(key).unwrap().unwrap(), blob);
        assert!(store.exists(key).unwrap());

        store.delete(key).unwrap();
        assert!(!store.exists(key).unwrap());
        assert!(store.get(key).unwrap().is_none());
        // Deleting again is fine.
        store.delete(key).unwrap();
    }

    #[test]
    fn file_store_shards_directories_by_hex_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileBlobStore::new(temp_dir.path()).unwrap();

        let key = b"abcdefgh";
        let path = store.key_to_path(key);
        // 'a' = 0x61, 'b' = 0x62 -> dirs "61"/"62".
        assert!(path.to_string_lossy().contains("61"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("6162"));
    }

    #[test]
    fn memory_store_shares_state_across_clones() {
        let store = MemoryBlobStore::new();
        let other = store.clone();
        store.put(b"k", b"v").unwrap();
        assert_eq!(other.get(b"k").unwrap().unwrap(), b"v");
        other.delete(b"k").unwrap();
        assert!(store.get(b"k").unwrap().is_none());
    }

    #[test]
    fn put_overwrites_previous_blob() {
        let store = MemoryBlobStore::new();
        store.put(b"k", b"v1").unwrap();
        store.put(b"k", b"v2").unwrap();
        assert_eq!(store.get(b"k").unwrap().unwrap(), b"v2");
    }
}
