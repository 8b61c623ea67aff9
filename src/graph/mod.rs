//! the commit graph engine
//!
//! This module holds everything that operates on one repository's in-memory
//! snapshot. It never does I/O: the `store` layer loads a [`Repository`],
//! hands it to the functions here and persists it again only if they
//! succeed.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Repository                           │
//! │        (commits + branches + tags + releases)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//!  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐
//!  │   refs    │  │reachabil- │  │   merge   │  │ licence / │
//!  │ (names)   │  │   ity     │  │  (ff)     │  │  upload   │
//!  └───────────┘  └───────────┘  └───────────┘  └───────────┘
//!        │              │              │              │
//!        └──────────────┴──────┬───────┴──────────────┘
//!                              │
//!                              ▼
//!                  ┌──────────────────────┐
//!                  │ commits (arena) +    │
//!                  │ commit / tree / hash │
//!                  └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use dbhub::graph::{RefManager, RefName, reachability};
//!
//! let dev = RefName::new("dev")?;
//! RefManager::create_branch(&mut repo, &dev, &head, "experiments")?;
//!
//! // rejected, and `repo` left untouched, if a tag would be stranded
//! RefManager::delete_branch(&mut repo, &dev)?;
//! ```

mod commit;
mod commits;
mod error;
mod hash;
mod licence;
mod refs;
mod repository;
mod tree;
mod types;
mod upload;

pub mod merge;
pub mod reachability;

// Re-export public API
pub use commit::{Commit, CommitBuilder, CommitMessage};
pub use commits::{CommitStore, History};
pub use error::{GraphError, GraphResult, ObjectKind};
pub use hash::{commit_id, tree_id, CommitFields};
pub use licence::{display_name, propagate_licences, LicenceChange, LicenceRegistry, MemoryLicenceRegistry};
pub use merge::{
    fast_forward, find_divergence, Divergence, DivergenceKind, LicenceMismatch, MergeOutcome, MergeRequest,
    MergeRequestState,
};
pub use reachability::{AssumeTablesPresent, TableCatalog};
pub use refs::{Branch, RefManager, Release, Tag};
pub use repository::{IntegrityIssue, Repository};
pub use tree::{EntryKind, Tree, TreeEntry};
pub use types::{CommitId, InvalidNameError, RefName, RepositoryId, Signature, TreeId};
pub use upload::{commit_upload, UploadOutcome, UploadRequest};
