//! Hook for dropping cached pages and query results after a mutation.

use parking_lot::Mutex;

use crate::graph::{CommitId, RepositoryId};

pub trait CacheInvalidator: Send + Sync {
    /// forget cached data for one commit, or for every commit when `commit` is None
    fn invalidate(&self, id: &RepositoryId, commit: Option<&CommitId>);
}

/// For deployments without a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, id: &RepositoryId, commit: Option<&CommitId>) {
        tracing::trace!(repository = %id, commit = ?commit.map(CommitId::as_str), "cache invalidation skipped");
    }
}

/// Remembers every invalidation it receives.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    calls: Mutex<Vec<(RepositoryId, Option<CommitId>)>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(RepositoryId, Option<CommitId>)> {
        self.calls.lock().clone()
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, id: &RepositoryId, commit: Option<&CommitId>) {
        self.calls.lock().push((id.clone(), commit.cloned()));
    }
}
