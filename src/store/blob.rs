//! Content-addressed storage for database file bytes.
//!
//! The engine only carries the SHA-256 and size of a file; the bytes live
//! here.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::store::error::{StoreError, StoreResult};
use crate::store::reference::write_atomic;

/// Where a stored blob can be found again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    pub sha256: String,
    pub size: u64,
}

impl BlobInfo {
    fn of(bytes: &[u8]) -> Self {
        Self {
            sha256: hex::encode(Sha256::digest(bytes)),
            size: bytes.len() as u64,
        }
    }
}

pub trait BlobStore: Send + Sync {
    /// store bytes under their SHA-256; storing the same bytes twice is a no-op
    fn store(&self, bytes: &[u8]) -> StoreResult<BlobInfo>;

    fn fetch(&self, sha256: &str) -> StoreResult<Vec<u8>>;

    fn contains(&self, sha256: &str) -> StoreResult<bool>;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, bytes: &[u8]) -> StoreResult<BlobInfo> {
        let info = BlobInfo::of(bytes);
        self.blobs
            .write()
            .entry(info.sha256.clone())
            .or_insert_with(|| Arc::from(bytes));
        Ok(info)
    }

    fn fetch(&self, sha256: &str) -> StoreResult<Vec<u8>> {
        self.blobs
            .read()
            .get(sha256)
            .map(|b| b.to_vec())
            .ok_or_else(|| StoreError::BlobNotFound(sha256.to_string()))
    }

    fn contains(&self, sha256: &str) -> StoreResult<bool> {
        Ok(self.blobs.read().contains_key(sha256))
    }
}

/// Blob store on disk: `<root>/<first two hex chars>/<sha256>`.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, sha256: &str) -> StoreResult<PathBuf> {
        if sha256.len() != 64 || !sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::BlobNotFound(sha256.to_string()));
        }
        Ok(self.root.join(&sha256[..2]).join(sha256))
    }
}

impl BlobStore for FileBlobStore {
    fn store(&self, bytes: &[u8]) -> StoreResult<BlobInfo> {
        let info = BlobInfo::of(bytes);
        let path = self.path_for(&info.sha256)?;
        if path.is_file() {
            return Ok(info);
        }
        let dir = self.root.join(&info.sha256[..2]);
        fs::create_dir_all(&dir)?;
        write_atomic(&dir, &path, bytes)?;
        tracing::debug!(sha256 = %info.sha256, size = info.size, "blob stored");
        Ok(info)
    }

    fn fetch(&self, sha256: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(sha256)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::BlobNotFound(sha256.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if BlobInfo::of(&bytes).sha256 != sha256 {
            return Err(StoreError::CorruptedData {
                path,
                reason: "blob content doesn't match its hash".to_string(),
            });
        }
        Ok(bytes)
    }

    fn contains(&self, sha256: &str) -> StoreResult<bool> {
        match self.path_for(sha256) {
            Ok(path) => Ok(path.is_file()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise(store: &dyn BlobStore) {
        let info = store.store(b"SQLite format 3\0").unwrap();
        assert_eq!(info.size, 16);
        assert_eq!(info.sha256.len(), 64);
        assert!(store.contains(&info.sha256).unwrap());
        assert_eq!(store.fetch(&info.sha256).unwrap(), b"SQLite format 3\0");

        assert_eq!(store.store(b"SQLite format 3\0").unwrap(), info);

        let missing = "00".repeat(32);
        assert!(!store.contains(&missing).unwrap());
        assert!(store.fetch(&missing).unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_blob_store() {
        let store = MemoryBlobStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_blob_store() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        exercise(&store);

        assert!(store.fetch("../../etc/passwd").unwrap_err().is_not_found());
    }

    #[test]
    fn test_file_blob_store_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        let info = store.store(b"original").unwrap();

        let path = dir.path().join(&info.sha256[..2]).join(&info.sha256);
        fs::write(&path, b"tampered").unwrap();
        assert!(store.fetch(&info.sha256).unwrap_err().is_fatal());
    }
}
