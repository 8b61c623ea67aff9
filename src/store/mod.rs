//! persistence and coordination around the commit graph engine
//!
//! The engine in [`crate::graph`] works on one in-memory [`Repository`]
//! snapshot. This module loads snapshots, runs engine operations on them
//! under a per-repository lock and writes them back with a version check.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbhub::store::{JsonFileReferenceStore, RepositoryManager};
//!
//! let refs = Arc::new(JsonFileReferenceStore::open("/var/lib/dbhub/refs")?);
//! let manager = RepositoryManager::builder(refs).build()?;
//! manager.delete_branch(&id, &RefName::new("stale")?)?;
//! ```
//!
//! [`Repository`]: crate::graph::Repository

mod blob;
mod cache;
mod error;
mod manager;
mod reference;

pub use blob::{BlobInfo, BlobStore, FileBlobStore, MemoryBlobStore};
pub use cache::{CacheInvalidator, NoopInvalidator, RecordingInvalidator};
pub use error::{StoreError, StoreResult};
pub use manager::{RepositoryManager, RepositoryManagerBuilder};
pub use reference::{JsonFileReferenceStore, MemoryReferenceStore, ReferenceStore, Versioned};
