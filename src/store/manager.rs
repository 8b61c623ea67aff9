//! Repository manager - runs engine operations against stored repositories.
//!
//! Every mutation is a read-modify-write of one whole repository:
//! - the repository's lock is taken for the duration of the operation
//! - the snapshot is loaded together with its store version
//! - the engine mutates an in-memory copy
//! - the copy is saved only if the engine succeeded, and only if the stored
//!   version is still the one that was loaded
//! - the cache is told to forget the repository
//!
//! The lock serializes writers in this process; the version check catches
//! writers in other processes sharing the same store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::graph::{
    self, reachability, AssumeTablesPresent, CommitId, GraphError, GraphResult, IntegrityIssue, LicenceChange,
    LicenceRegistry, MemoryLicenceRegistry, MergeOutcome, MergeRequest, RefManager, RefName, Release, Repository,
    RepositoryId, Signature, TableCatalog, Tag, UploadOutcome, UploadRequest,
};
use crate::store::blob::{BlobStore, MemoryBlobStore};
use crate::store::cache::{CacheInvalidator, NoopInvalidator};
use crate::store::error::StoreResult;
use crate::store::reference::ReferenceStore;

/// Entry point for working with stored repositories.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct RepositoryManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: EngineConfig,
    default_branch: RefName,
    refs: Arc<dyn ReferenceStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn CacheInvalidator>,
    licences: Arc<dyn LicenceRegistry + Send + Sync>,
    tables: Arc<dyn TableCatalog + Send + Sync>,
    /// one lock per repository, created on first use
    locks: Mutex<HashMap<RepositoryId, Arc<Mutex<()>>>>,
}

/// Builder for a [`RepositoryManager`]; only the reference store is required.
pub struct RepositoryManagerBuilder {
    config: EngineConfig,
    refs: Arc<dyn ReferenceStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn CacheInvalidator>,
    licences: Arc<dyn LicenceRegistry + Send + Sync>,
    tables: Arc<dyn TableCatalog + Send + Sync>,
}

impl RepositoryManagerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn licences(mut self, licences: Arc<dyn LicenceRegistry + Send + Sync>) -> Self {
        self.licences = licences;
        self
    }

    pub fn tables(mut self, tables: Arc<dyn TableCatalog + Send + Sync>) -> Self {
        self.tables = tables;
        self
    }

    pub fn build(self) -> StoreResult<RepositoryManager> {
        let default_branch = RefName::new(self.config.default_branch.as_str()).map_err(GraphError::from)?;
        Ok(RepositoryManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                default_branch,
                refs: self.refs,
                blobs: self.blobs,
                cache: self.cache,
                licences: self.licences,
                tables: self.tables,
                locks: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl RepositoryManager {
    pub fn builder(refs: Arc<dyn ReferenceStore>) -> RepositoryManagerBuilder {
        RepositoryManagerBuilder {
            config: EngineConfig::default(),
            refs,
            blobs: Arc::new(MemoryBlobStore::new()),
            cache: Arc::new(NoopInvalidator),
            licences: Arc::new(MemoryLicenceRegistry::new()),
            tables: Arc::new(AssumeTablesPresent),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.inner.blobs.as_ref()
    }

    fn lock_for(&self, id: &RepositoryId) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` holding the repository's lock.
    ///
    /// The lock's map entry is removed once no other caller holds or waits on
    /// it, so the map only tracks repositories with operations in flight.
    fn exclusive<T>(&self, id: &RepositoryId, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock();
            f()
        };

        let mut locks = self.inner.locks.lock();
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(id);
        }
        result
    }

    fn prepare(&self, mut repo: Repository) -> Repository {
        repo.set_walk_limit(self.inner.config.max_history_depth);
        repo
    }

    // ==================== Reads ====================

    /// load a repository snapshot without locking
    pub fn load(&self, id: &RepositoryId) -> StoreResult<Repository> {
        let stored = self.inner.refs.load(id)?;
        Ok(self.prepare(stored.value))
    }

    pub fn exists(&self, id: &RepositoryId) -> StoreResult<bool> {
        self.inner.refs.exists(id)
    }

    pub fn list(&self) -> StoreResult<Vec<RepositoryId>> {
        self.inner.refs.list()
    }

    pub fn verify(&self, id: &RepositoryId) -> StoreResult<Vec<IntegrityIssue>> {
        let repo = self.load(id)?;
        let issues = repo.verify();
        for issue in &issues {
            tracing::error!(repository = %id, %issue, "integrity check failed");
        }
        Ok(issues)
    }

    // ==================== Read-modify-write ====================

    /// Run `f` against a locked, freshly loaded snapshot and save the result.
    ///
    /// Nothing is saved when `f` fails.
    pub fn with_repository<F, T>(&self, op: &'static str, id: &RepositoryId, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Repository) -> GraphResult<T>,
    {
        let op_id = Ulid::new().to_string().to_lowercase();
        let span = tracing::info_span!(
            "repository_op",
            op,
            owner = %id.owner,
            database = %id.database,
            op_id = %op_id
        );
        let _enter = span.enter();

        self.exclusive(id, || -> StoreResult<T> {
            let stored = self.inner.refs.load(id)?;
            let mut repo = self.prepare(stored.value);

            let result = match f(&mut repo) {
                Ok(result) => result,
                Err(e) => {
                    if e.is_fatal() {
                        tracing::error!(error = %e, "operation aborted on corrupted history");
                    } else {
                        tracing::debug!(error = %e, "operation rejected");
                    }
                    return Err(e.into());
                }
            };

            let version = self.inner.refs.save(&repo, stored.version)?;
            self.inner.cache.invalidate(id, None);
            tracing::debug!(version, "repository saved");
            Ok(result)
        })
    }

    // ==================== Uploads ====================

    /// Store an uploaded database file and commit it.
    ///
    /// Creates the repository when it doesn't exist yet. The content hash
    /// and size in `req` are filled in from the blob store; a non-empty hash
    /// supplied by the caller must match.
    pub fn upload(&self, id: &RepositoryId, bytes: &[u8], mut req: UploadRequest) -> StoreResult<UploadOutcome> {
        let info = self.inner.blobs.store(bytes)?;
        if !req.content_sha256.is_empty() && !req.content_sha256.eq_ignore_ascii_case(&info.sha256) {
            return Err(GraphError::InvalidRequest(format!(
                "SHA256 given ({}) for uploaded file doesn't match the calculated value ({})",
                req.content_sha256, info.sha256
            ))
            .into());
        }
        req.content_sha256 = info.sha256;
        req.size_bytes = info.size;

        let created = self.exclusive(id, || -> StoreResult<Option<UploadOutcome>> {
            if self.inner.refs.exists(id)? {
                return Ok(None);
            }
            let repo = Repository::from_upload(
                id.clone(),
                self.inner.default_branch.clone(),
                &req,
                self.inner.licences.as_ref(),
            )?;
            self.inner.refs.create(&repo)?;
            self.inner.cache.invalidate(id, None);
            let branch = repo.default_branch().clone();
            let commit = repo.branch(&branch)?.head.clone();
            Ok(Some(UploadOutcome {
                branch,
                commit,
                commit_count: 1,
                created_branch: true,
                rewound: Vec::new(),
            }))
        })?;
        if let Some(outcome) = created {
            return Ok(outcome);
        }

        let licences = Arc::clone(&self.inner.licences);
        self.with_repository("upload", id, |repo| {
            graph::commit_upload(repo, &req, licences.as_ref())
        })
    }

    // ==================== Branches ====================

    pub fn create_branch(
        &self,
        id: &RepositoryId,
        name: &RefName,
        commit: &CommitId,
        description: &str,
    ) -> StoreResult<()> {
        self.with_repository("create_branch", id, |repo| {
            RefManager::create_branch(repo, name, commit, description)
        })
    }

    pub fn rename_branch(&self, id: &RepositoryId, old: &RefName, new: &RefName) -> StoreResult<()> {
        self.with_repository("rename_branch", id, |repo| RefManager::rename_branch(repo, old, new))
    }

    pub fn set_branch_description(&self, id: &RepositoryId, name: &RefName, description: &str) -> StoreResult<()> {
        self.with_repository("set_branch_description", id, |repo| {
            RefManager::set_branch_description(repo, name, description)
        })
    }

    /// delete a branch, returning how many commits were pruned with it
    pub fn delete_branch(&self, id: &RepositoryId, name: &RefName) -> StoreResult<usize> {
        self.with_repository("delete_branch", id, |repo| RefManager::delete_branch(repo, name))
    }

    pub fn set_default_branch(&self, id: &RepositoryId, name: &RefName) -> StoreResult<()> {
        self.with_repository("set_default_branch", id, |repo| RefManager::set_default_branch(repo, name))
    }

    pub fn set_default_table(&self, id: &RepositoryId, table: Option<String>) -> StoreResult<()> {
        self.with_repository("set_default_table", id, |repo| {
            repo.set_default_table(table);
            Ok(())
        })
    }

    /// remove the head commit of a branch, returning the new head
    pub fn delete_commit(&self, id: &RepositoryId, branch: &RefName, commit: &CommitId) -> StoreResult<CommitId> {
        let tables = Arc::clone(&self.inner.tables);
        self.with_repository("delete_commit", id, |repo| {
            reachability::delete_commit(repo, branch, commit, tables.as_ref())
        })
    }

    /// rewind a branch to an older commit, returning the removed commits
    pub fn rewind_history(&self, id: &RepositoryId, branch: &RefName, target: &CommitId) -> StoreResult<Vec<CommitId>> {
        self.with_repository("rewind_history", id, |repo| {
            reachability::rewind_history(repo, branch, target)
        })
    }

    // ==================== Tags and releases ====================

    pub fn create_tag(
        &self,
        id: &RepositoryId,
        name: &RefName,
        commit: &CommitId,
        message: &str,
        tagger: Signature,
    ) -> StoreResult<()> {
        self.with_repository("create_tag", id, |repo| {
            RefManager::create_tag(repo, name, commit, message, tagger, Utc::now())
        })
    }

    pub fn rename_tag(&self, id: &RepositoryId, old: &RefName, new: &RefName, message: Option<&str>) -> StoreResult<()> {
        self.with_repository("rename_tag", id, |repo| RefManager::rename_tag(repo, old, new, message))
    }

    pub fn delete_tag(&self, id: &RepositoryId, name: &RefName) -> StoreResult<Tag> {
        self.with_repository("delete_tag", id, |repo| RefManager::delete_tag(repo, name))
    }

    pub fn create_release(
        &self,
        id: &RepositoryId,
        name: &RefName,
        commit: &CommitId,
        description: &str,
        releaser: Signature,
    ) -> StoreResult<()> {
        self.with_repository("create_release", id, |repo| {
            RefManager::create_release(repo, name, commit, description, releaser, Utc::now())
        })
    }

    pub fn rename_release(
        &self,
        id: &RepositoryId,
        old: &RefName,
        new: &RefName,
        description: Option<&str>,
    ) -> StoreResult<()> {
        self.with_repository("rename_release", id, |repo| {
            RefManager::rename_release(repo, old, new, description)
        })
    }

    pub fn delete_release(&self, id: &RepositoryId, name: &RefName) -> StoreResult<Release> {
        self.with_repository("delete_release", id, |repo| RefManager::delete_release(repo, name))
    }

    // ==================== Forks ====================

    /// copy `src_id` to `dest_owner`, failing if the destination already exists
    pub fn fork(&self, src_id: &RepositoryId, dest_owner: &str) -> StoreResult<RepositoryId> {
        let copy = self.load(src_id)?.fork(dest_owner)?;
        let dest_id = copy.id().clone();

        self.exclusive(&dest_id, || self.inner.refs.create(&copy))?;
        self.inner.cache.invalidate(&dest_id, None);
        Ok(dest_id)
    }

    // ==================== Merges ====================

    /// Fast-forward `dest_branch` of `dest_id` over `src_branch` of `src_id`.
    ///
    /// Only the destination is locked; the source is read as a snapshot.
    pub fn merge(
        &self,
        src_id: &RepositoryId,
        src_branch: &RefName,
        dest_id: &RepositoryId,
        dest_branch: &RefName,
        actor: &Signature,
    ) -> StoreResult<MergeOutcome> {
        let source = if src_id == dest_id {
            None
        } else {
            Some(self.load(src_id)?)
        };

        self.with_repository("merge", dest_id, |dest| {
            let snapshot;
            let src = match &source {
                Some(repo) => repo,
                None => {
                    snapshot = dest.clone();
                    &snapshot
                }
            };
            graph::fast_forward(src, src_branch, dest, dest_branch, actor)
        })
    }

    pub fn open_merge_request(
        &self,
        src_id: &RepositoryId,
        src_branch: &RefName,
        dest_id: &RepositoryId,
        dest_branch: &RefName,
    ) -> StoreResult<MergeRequest> {
        let src = self.load(src_id)?;
        let dest = if src_id == dest_id {
            src.clone()
        } else {
            self.load(dest_id)?
        };
        Ok(MergeRequest::open(&src, src_branch, &dest, dest_branch)?)
    }

    /// merge an open request into `dest_id`; the request is only closed if the merge is saved
    pub fn apply_merge_request(
        &self,
        dest_id: &RepositoryId,
        request: &mut MergeRequest,
        actor: &Signature,
    ) -> StoreResult<MergeOutcome> {
        let mut pending = request.clone();
        let outcome = self.with_repository("apply_merge_request", dest_id, |dest| {
            pending.merge_into(dest, actor)
        })?;
        *request = pending;
        Ok(outcome)
    }

    // ==================== Licences ====================

    pub fn set_licences(
        &self,
        id: &RepositoryId,
        assignments: &BTreeMap<RefName, String>,
        actor: &Signature,
    ) -> StoreResult<Vec<LicenceChange>> {
        self.set_licences_at(id, assignments, actor, Utc::now())
    }

    pub fn set_licences_at(
        &self,
        id: &RepositoryId,
        assignments: &BTreeMap<RefName, String>,
        actor: &Signature,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<LicenceChange>> {
        let licences = Arc::clone(&self.inner.licences);
        self.with_repository("set_licences", id, |repo| {
            graph::propagate_licences(repo, assignments, licences.as_ref(), actor, now)
        })
    }
}

impl std::fmt::Debug for RepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryManager")
            .field("config", &self.inner.config)
            .field("locked_repositories", &self.inner.locks.lock().len())
            .finish()
    }
}
