//! DBHub - version control for hosted SQLite databases
//!
//! Every upload of a database file becomes a commit. Branches, tags and
//! releases point into the commit graph; merges are fast-forward only and
//! deleting a branch never strands a tag or release.
//!
//! - [`graph`]: the commit graph engine, pure and I/O free
//! - [`store`]: snapshot persistence, blob storage and the repository manager
//! - [`config`]: engine settings loaded from TOML
//! - [`logging`]: tracing subscriber setup for binaries
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbhub::graph::{RepositoryId, Signature, UploadRequest};
//! use dbhub::store::{MemoryReferenceStore, RepositoryManager};
//!
//! let manager = RepositoryManager::builder(Arc::new(MemoryReferenceStore::new()))
//!     .build()
//!     .unwrap();
//! let id = RepositoryId::new("alice", "chinook.sqlite").unwrap();
//! let author = Signature::new("Alice", "alice@example.org");
//! let bytes = std::fs::read("chinook.sqlite").unwrap();
//! manager
//!     .upload(&id, &bytes, UploadRequest::new("chinook.sqlite", "", 0, author))
//!     .unwrap();
//! ```

pub mod config;
pub mod graph;
pub mod logging;
pub mod store;
