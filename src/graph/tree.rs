//! Trees: the content-addressed list of files a commit points at.
//!
//! A hosted repository's tree holds exactly one `database` entry today, but
//! nothing here relies on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::hash;
use crate::graph::types::TreeId;

/// the type of file a tree entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Database,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Database => "database",
        }
    }
}

/// One file in a tree. The file bytes live in the blob store under `content_sha256`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub kind: EntryKind,
    pub name: String,
    pub content_sha256: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    /// empty when no licence was chosen
    pub licence_sha256: String,
}

impl TreeEntry {
    /// create a database entry
    pub fn database(
        name: impl Into<String>,
        content_sha256: impl Into<String>,
        size_bytes: u64,
        last_modified: DateTime<Utc>,
        licence_sha256: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntryKind::Database,
            name: name.into(),
            content_sha256: content_sha256.into(),
            size_bytes,
            last_modified,
            licence_sha256: licence_sha256.into(),
        }
    }
}

/// An immutable tree. The id is always computed from the entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    id: TreeId,
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// build a tree and hash its entries
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        let id = hash::tree_id(&entries);
        Self { id, entries }
    }

    pub fn id(&self) -> &TreeId {
        &self.id
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// the first database entry, if any
    pub fn database_entry(&self) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.kind == EntryKind::Database)
    }

    /// the licence recorded for the database file
    pub fn licence(&self) -> Option<&str> {
        self.database_entry().map(|e| e.licence_sha256.as_str())
    }

    /// size of the database file in bytes (0 for an empty tree)
    pub fn database_size(&self) -> u64 {
        self.database_entry().map(|e| e.size_bytes).unwrap_or(0)
    }

    /// produce a new tree with every database entry relicensed
    ///
    /// name, content hash, size and modification time are carried over
    pub fn with_licence(&self, licence_sha256: &str) -> Tree {
        let entries = self
            .entries
            .iter()
            .map(|e| {
                let mut e = e.clone();
                if e.kind == EntryKind::Database {
                    e.licence_sha256 = licence_sha256.to_string();
                }
                e
            })
            .collect();
        Tree::new(entries)
    }

    /// check the stored id against the entries
    pub fn verify_id(&self) -> bool {
        hash::tree_id(&self.entries) == self.id
    }
}
