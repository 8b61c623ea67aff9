//! Persistence layer error types

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::{GraphError, RepositoryId};

/// the main error type for store and manager operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// the engine rejected the operation
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// no repository is stored under this owner/database
    #[error("repository not found: {0}")]
    NotFound(RepositoryId),

    /// a repository with this owner/database already exists
    #[error("repository already exists: {0}")]
    AlreadyExists(RepositoryId),

    /// the stored snapshot changed between load and save
    #[error("concurrent modification: {id} is at version {actual}, expected {expected}")]
    ConcurrentModification {
        id: RepositoryId,
        expected: u64,
        actual: u64,
    },

    /// no blob is stored under this hash
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// a stored file couldn't be parsed or doesn't match its location
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) | StoreError::BlobNotFound(_) => true,
            StoreError::Graph(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            StoreError::AlreadyExists(_) | StoreError::ConcurrentModification { .. } => true,
            StoreError::Graph(e) => e.is_conflict(),
            _ => false,
        }
    }

    /// check if retrying the whole operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::ConcurrentModification { .. })
    }

    /// check if this error points at corrupted data that needs an administrator
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::CorruptedData { .. } => true,
            StoreError::Graph(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
