//! Snapshot round trips through the facade and both blob backends.

use strata::{
    FileBlobStore, MemoryBlobStore, MemoryMetadata, MemoryVault, PersistenceError, SearchQuery,
    VaultConfig, VaultError,
};

fn populated_vault(blobs: Box<dyn strata::BlobStore>) -> MemoryVault {
    let mut v = MemoryVault::new(VaultConfig::new(4)).with_blob_store(blobs);
    for i in 0..60u64 {
        let f = i as f32;
        let meta = MemoryMetadata {
            category: Some(format!("cat-{}", i % 3)),
            importance: (i % 10 + 1) as u8,
            tags: vec![format!("tag-{}", i % 5)],
            ..Default::default()
        };
        v.insert(
            "owner",
            i,
            vec![f.cos(), f.sin(), (f * 0.3).cos(), (f * 0.3).sin()],
            Some(meta),
        )
        .unwrap();
    }
    v.remove("owner", 13).unwrap();
    v
}

#[test]
fn flush_then_load_reproduces_search_results() {
    let blobs = MemoryBlobStore::new();
    let mut v = populated_vault(Box::new(blobs.clone()));

    let query = SearchQuery::new(vec![1.0, 0.0, 1.0, 0.0], 10);
    let before = v.search("owner", &query).unwrap();
    let blob_ref = v.flush("owner").unwrap();
    assert!(!blob_ref.is_empty());

    // Fresh vault, same backend: load and compare.
    let mut restored = MemoryVault::new(VaultConfig::new(4)).with_blob_store(Box::new(blobs));
    restored.load("owner").unwrap();

    let after = restored.search("owner", &query).unwrap();
    assert_eq!(before.len(), after.len());
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.similarity, b.similarity);
        assert_eq!(a.relevance_score, b.relevance_score);
        assert_eq!(a.metadata.category, b.metadata.category);
    }
    assert_eq!(
        v.stats("owner").unwrap().size,
        restored.stats("owner").unwrap().size
    );
}

#[test]
fn file_backend_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = FileBlobStore::new(dir.path()).unwrap();
    let mut v = populated_vault(Box::new(store));
    v.flush("owner").unwrap();

    let store = FileBlobStore::new(dir.path()).unwrap();
    let mut restored = MemoryVault::new(VaultConfig::new(4)).with_blob_store(Box::new(store));
    restored.load("owner").unwrap();
    assert_eq!(restored.stats("owner").unwrap().size, 59);
}

#[test]
fn load_of_missing_snapshot_is_recoverable() {
    let mut v =
        MemoryVault::new(VaultConfig::new(4)).with_blob_store(Box::new(MemoryBlobStore::new()));
    let err = v.load("never-saved").unwrap_err();
    assert!(matches!(
        err,
        VaultError::Persistence(PersistenceError::NotFound(_))
    ));
    // The vault is still usable afterwards.
    v.insert("never-saved", 1, vec![1.0, 0.0, 0.0, 0.0], None)
        .unwrap();
}

#[test]
fn corrupted_snapshot_is_rejected_not_installed() {
    let blobs = MemoryBlobStore::new();
    let mut v = populated_vault(Box::new(blobs.clone()));
    v.flush("owner").unwrap();

    // Stomp the header.
    use strata::BlobStore;
    let mut blob = blobs.get(b"owner").unwrap().unwrap();
    blob[0] = b'X';
    blobs.put(b"owner", &blob).unwrap();

    let mut restored =
        MemoryVault::new(VaultConfig::new(4)).with_blob_store(Box::new(blobs));
    let err = restored.load("owner").unwrap_err();
    assert!(matches!(
        err,
        VaultError::Persistence(PersistenceError::Format(_))
    ));
    assert!(matches!(
        restored.stats("owner"),
        Err(VaultError::OwnerNotFound(_))
    ));
}

#[test]
fn pending_inserts_survive_a_load() {
    let blobs = MemoryBlobStore::new();
    let mut v = populated_vault(Box::new(blobs.clone()));
    v.flush("owner").unwrap();

    // Queue an insert, then load: the snapshot replaces the graph and the
    // newer pending insert is re-applied on top.
    let mut config = VaultConfig::new(4);
    config.batch.max_batch = 100;
    config.batch.max_delay = std::time::Duration::from_secs(3600);
    let mut restored = MemoryVault::new(config).with_blob_store(Box::new(blobs));
    restored
        .insert("owner", 999, vec![0.5, 0.5, 0.5, 0.5], None)
        .unwrap();
    restored.load("owner").unwrap();

    assert_eq!(restored.stats("owner").unwrap().size, 60);
    let hits = restored
        .search("owner", &SearchQuery::new(vec![0.5, 0.5, 0.5, 0.5], 1))
        .unwrap();
    assert_eq!(hits[0].id, 999);
}
