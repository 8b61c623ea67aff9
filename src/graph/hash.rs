//! Deterministic content addressing for trees and commits.
//!
//! Both hashes are SHA-256 over a canonical byte layout. Entry order in a
//! tree is significant; nothing is sorted.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::graph::tree::TreeEntry;
use crate::graph::types::{CommitId, Signature, TreeId};

/// hash an ordered list of tree entries
///
/// layout per entry: `kind \0 licence \0 sha256 \0 name \0 last_modified \0 size \n`
pub fn tree_id(entries: &[TreeEntry]) -> TreeId {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.kind.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(entry.licence_sha256.as_bytes());
        hasher.update([0]);
        hasher.update(entry.content_sha256.as_bytes());
        hasher.update([0]);
        hasher.update(entry.name.as_bytes());
        hasher.update([0]);
        hasher.update(format_timestamp(&entry.last_modified).as_bytes());
        hasher.update([0]);
        hasher.update(format!("{}\n", entry.size_bytes).as_bytes());
    }
    TreeId::from_digest(&hasher.finalize())
}

/// Every field of a commit except its id.
#[derive(Debug, Clone, Copy)]
pub struct CommitFields<'a> {
    pub parent: Option<&'a CommitId>,
    pub tree: &'a TreeId,
    pub author: &'a Signature,
    pub committer: &'a Signature,
    pub timestamp: &'a DateTime<Utc>,
    pub message: &'a str,
}

/// hash the fields of a commit
///
/// the committer line is always written, so every field takes part in the id
pub fn commit_id(fields: CommitFields<'_>) -> CommitId {
    let timestamp = format_timestamp(fields.timestamp);

    let mut buf = String::new();
    buf.push_str(&format!("tree {}\n", fields.tree));
    if let Some(parent) = fields.parent {
        buf.push_str(&format!("parent {}\n", parent));
    }
    buf.push_str(&format!(
        "author {} <{}> {}\n",
        fields.author.name, fields.author.email, timestamp
    ));
    buf.push_str(&format!(
        "committer {} <{}> {}\n",
        fields.committer.name, fields.committer.email, timestamp
    ));
    buf.push('\n');
    buf.push_str(fields.message);

    let mut hasher = Sha256::new();
    hasher.update(buf.as_bytes());
    hasher.update([0]);
    CommitId::from_digest(&hasher.finalize())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
