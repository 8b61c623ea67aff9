//! Durable storage of whole repository snapshots.
//!
//! A store keeps one version counter per repository. `save` is a
//! compare-and-swap on that counter: it only succeeds if nobody else saved
//! since the caller's `load`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::graph::{Repository, RepositoryId};
use crate::store::error::{StoreError, StoreResult};

/// A value together with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Persists repository snapshots wholesale.
pub trait ReferenceStore: Send + Sync {
    /// store a new repository at version 1
    fn create(&self, repo: &Repository) -> StoreResult<u64>;

    fn load(&self, id: &RepositoryId) -> StoreResult<Versioned<Repository>>;

    /// replace the snapshot if it is still at `expected_version`, returning the new version
    fn save(&self, repo: &Repository, expected_version: u64) -> StoreResult<u64>;

    fn exists(&self, id: &RepositoryId) -> StoreResult<bool>;

    /// every stored repository, sorted
    fn list(&self) -> StoreResult<Vec<RepositoryId>>;
}

// ==================== In-memory store ====================

/// Reference store backed by a map, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryReferenceStore {
    repos: RwLock<HashMap<RepositoryId, Versioned<Repository>>>,
}

impl MemoryReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn create(&self, repo: &Repository) -> StoreResult<u64> {
        let mut repos = self.repos.write();
        if repos.contains_key(repo.id()) {
            return Err(StoreError::AlreadyExists(repo.id().clone()));
        }
        repos.insert(
            repo.id().clone(),
            Versioned {
                version: 1,
                value: repo.clone(),
            },
        );
        Ok(1)
    }

    fn load(&self, id: &RepositoryId) -> StoreResult<Versioned<Repository>> {
        self.repos
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn save(&self, repo: &Repository, expected_version: u64) -> StoreResult<u64> {
        let mut repos = self.repos.write();
        let stored = repos
            .get_mut(repo.id())
            .ok_or_else(|| StoreError::NotFound(repo.id().clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::ConcurrentModification {
                id: repo.id().clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }
        stored.version += 1;
        stored.value = repo.clone();
        Ok(stored.version)
    }

    fn exists(&self, id: &RepositoryId) -> StoreResult<bool> {
        Ok(self.repos.read().contains_key(id))
    }

    fn list(&self) -> StoreResult<Vec<RepositoryId>> {
        let mut ids: Vec<RepositoryId> = self.repos.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ==================== JSON file store ====================

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u64,
    repository: &'a Repository,
}

#[derive(Deserialize)]
struct Document {
    version: u64,
    repository: Repository,
}

/// Reference store writing one JSON document per repository.
///
/// Layout: `<root>/<owner>/<database>.json`. Writes go to a temporary file in
/// the same directory and are renamed into place, so readers never see a
/// half-written document.
///
/// `create` and `save` hold an exclusive OS lock on
/// `<root>/<owner>/<database>.json.lock` from the version check until the new
/// document is in place. Every store opened on the same directory, in any
/// process, takes the same lock.
#[derive(Debug)]
pub struct JsonFileReferenceStore {
    root: PathBuf,
}

/// Exclusive lock on a repository's lock file, released on drop.
struct DocumentLock {
    file: File,
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release repository lock");
        }
    }
}

impl JsonFileReferenceStore {
    const EXTENSION: &'static str = ".json";
    const LOCK_EXTENSION: &'static str = ".json.lock";

    /// open a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &RepositoryId) -> PathBuf {
        self.root
            .join(&id.owner)
            .join(format!("{}{}", id.database, Self::EXTENSION))
    }

    /// block until this repository's lock file is exclusively ours
    fn lock(&self, id: &RepositoryId) -> StoreResult<DocumentLock> {
        let dir = self.root.join(&id.owner);
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{}{}", id.database, Self::LOCK_EXTENSION)))?;
        file.lock_exclusive()?;
        Ok(DocumentLock { file })
    }

    fn read_document(&self, id: &RepositoryId) -> StoreResult<Document> {
        let path = self.path_for(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };
        let doc: Document = serde_json::from_str(&content).map_err(|e| StoreError::CorruptedData {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if doc.repository.id() != id {
            return Err(StoreError::CorruptedData {
                path,
                reason: format!("file holds repository {}", doc.repository.id()),
            });
        }
        Ok(doc)
    }

    /// write the document; with `replace` false an existing document is an error
    fn write_document(&self, repo: &Repository, version: u64, replace: bool) -> StoreResult<()> {
        let path = self.path_for(repo.id());
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(&DocumentRef {
            version,
            repository: repo,
        })?;
        let tmp = staged(dir, &json)?;
        if replace {
            tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        } else {
            match tmp.persist_noclobber(&path) {
                Ok(_) => {}
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(StoreError::AlreadyExists(repo.id().clone()))
                }
                Err(e) => return Err(StoreError::Io(e.error)),
            }
        }
        Ok(())
    }
}

/// `bytes` written and synced to a temporary file in `dir`
fn staged(dir: &Path, bytes: &[u8]) -> StoreResult<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// write `bytes` to `path` through a temporary file in `dir`
pub(crate) fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> StoreResult<()> {
    staged(dir, bytes)?
        .persist(path)
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl ReferenceStore for JsonFileReferenceStore {
    fn create(&self, repo: &Repository) -> StoreResult<u64> {
        let _lock = self.lock(repo.id())?;
        self.write_document(repo, 1, false)?;
        tracing::debug!(repository = %repo.id(), "repository document created");
        Ok(1)
    }

    fn load(&self, id: &RepositoryId) -> StoreResult<Versioned<Repository>> {
        let doc = self.read_document(id)?;
        Ok(Versioned {
            version: doc.version,
            value: doc.repository,
        })
    }

    fn save(&self, repo: &Repository, expected_version: u64) -> StoreResult<u64> {
        let _lock = self.lock(repo.id())?;
        let current = self.read_document(repo.id())?.version;
        if current != expected_version {
            return Err(StoreError::ConcurrentModification {
                id: repo.id().clone(),
                expected: expected_version,
                actual: current,
            });
        }
        let version = current + 1;
        self.write_document(repo, version, true)?;
        tracing::debug!(repository = %repo.id(), version, "repository document saved");
        Ok(version)
    }

    fn exists(&self, id: &RepositoryId) -> StoreResult<bool> {
        Ok(self.path_for(id).is_file())
    }

    fn list(&self) -> StoreResult<Vec<RepositoryId>> {
        let mut ids = Vec::new();
        for owner in fs::read_dir(&self.root)? {
            let owner = owner?;
            if !owner.file_type()?.is_dir() {
                continue;
            }
            let owner_name = owner.file_name().to_string_lossy().into_owned();
            for file in fs::read_dir(owner.path())? {
                let file_name = file?.file_name().to_string_lossy().into_owned();
                let Some(database) = file_name.strip_suffix(Self::EXTENSION) else {
                    continue;
                };
                match RepositoryId::new(owner_name.as_str(), database) {
                    Ok(id) => ids.push(id),
                    Err(e) => tracing::warn!(owner = %owner_name, file = %file_name, error = %e, "skipping unreadable entry"),
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CommitBuilder, RefName, Signature, Tree, TreeEntry};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn repo(owner: &str, database: &str) -> Repository {
        let tree = Tree::new(vec![TreeEntry::database(
            database,
            "ab".repeat(32),
            10,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "",
        )]);
        let root = CommitBuilder::new()
            .tree(tree)
            .author(Signature::new("Alice", "alice@example.org"))
            .timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .message("first")
            .build()
            .unwrap();
        Repository::create(
            RepositoryId::new(owner, database).unwrap(),
            RefName::new("main").unwrap(),
            root,
        )
        .unwrap()
    }

    fn exercise(store: &dyn ReferenceStore) {
        let a = repo("alice", "a.sqlite");
        let id = a.id().clone();

        assert!(!store.exists(&id).unwrap());
        assert!(store.load(&id).unwrap_err().is_not_found());

        assert_eq!(store.create(&a).unwrap(), 1);
        assert!(store.create(&a).unwrap_err().is_conflict());
        assert!(store.exists(&id).unwrap());

        let loaded = store.load(&id).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.value, a);

        let mut changed = loaded.value.clone();
        changed.set_default_table(Some("albums".to_string()));
        assert_eq!(store.save(&changed, 1).unwrap(), 2);

        // a writer still holding version 1 loses
        let err = store.save(&loaded.value, 1).unwrap_err();
        assert!(err.is_retriable());
        let current = store.load(&id).unwrap();
        assert_eq!(current.version, 2);
        assert_eq!(current.value.default_table(), Some("albums"));

        store.create(&repo("bob", "z.sqlite")).unwrap();
        store.create(&repo("alice", "b.sqlite")).unwrap();
        let listed: Vec<String> = store.list().unwrap().iter().map(|id| id.to_string()).collect();
        assert_eq!(listed, vec!["alice/a.sqlite", "alice/b.sqlite", "bob/z.sqlite"]);

        let ghost = repo("carol", "c.sqlite");
        assert!(store.save(&ghost, 1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryReferenceStore::new());
    }

    #[test]
    fn test_json_file_store() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileReferenceStore::open(dir.path().join("refs")).unwrap();
        exercise(&store);

        assert!(dir.path().join("refs/alice/a.sqlite.json").is_file());
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let a = repo("alice", "a.sqlite");
        {
            let store = JsonFileReferenceStore::open(dir.path()).unwrap();
            store.create(&a).unwrap();
        }
        let store = JsonFileReferenceStore::open(dir.path()).unwrap();
        let loaded = store.load(a.id()).unwrap();
        assert_eq!(loaded.value, a);
        assert!(loaded.value.verify().is_empty());
    }

    #[test]
    fn test_json_file_store_detects_misplaced_document() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileReferenceStore::open(dir.path()).unwrap();
        store.create(&repo("alice", "a.sqlite")).unwrap();

        fs::create_dir_all(dir.path().join("mallory")).unwrap();
        fs::copy(
            dir.path().join("alice/a.sqlite.json"),
            dir.path().join("mallory/a.sqlite.json"),
        )
        .unwrap();

        let err = store
            .load(&RepositoryId::new("mallory", "a.sqlite").unwrap())
            .unwrap_err();
        assert!(err.is_fatal());

        fs::write(dir.path().join("alice/a.sqlite.json"), "{ not json").unwrap();
        let err = store
            .load(&RepositoryId::new("alice", "a.sqlite").unwrap())
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptedData { .. }));
    }

    #[test]
    fn test_json_file_stores_on_one_directory_never_both_win() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let dir = TempDir::new().unwrap();
        let stores = [
            Arc::new(JsonFileReferenceStore::open(dir.path()).unwrap()),
            Arc::new(JsonFileReferenceStore::open(dir.path()).unwrap()),
        ];
        let a = repo("alice", "a.sqlite");
        stores[0].create(&a).unwrap();

        for round in 0..50 {
            let loaded = stores[0].load(a.id()).unwrap();
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = stores
                .iter()
                .enumerate()
                .map(|(i, store)| {
                    let store = Arc::clone(store);
                    let barrier = Arc::clone(&barrier);
                    let mut changed = loaded.value.clone();
                    changed.set_default_table(Some(format!("writer{}", i)));
                    let version = loaded.version;
                    thread::spawn(move || {
                        barrier.wait();
                        store.save(&changed, version)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let won = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(won, 1, "round {}", round);
            for err in results.into_iter().filter_map(Result::err) {
                assert!(err.is_retriable());
            }
            assert_eq!(stores[1].load(a.id()).unwrap().version, loaded.version + 1);
        }
    }

    #[test]
    fn test_json_file_create_does_not_clobber_other_store() {
        let dir = TempDir::new().unwrap();
        let first = JsonFileReferenceStore::open(dir.path()).unwrap();
        let second = JsonFileReferenceStore::open(dir.path()).unwrap();
        let a = repo("alice", "a.sqlite");

        first.create(&a).unwrap();
        let mut changed = a.clone();
        changed.set_default_table(Some("albums".to_string()));
        first.save(&changed, 1).unwrap();

        let err = second.create(&a).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        let stored = second.load(a.id()).unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.value.default_table(), Some("albums"));
        assert_eq!(second.list().unwrap(), vec![a.id().clone()]);
    }
}
