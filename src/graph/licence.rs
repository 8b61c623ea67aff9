//! Licences and the commits created when a branch's licence changes.
//!
//! Licences are identified by the SHA-256 of their text. The engine only ever
//! stores that hash; a [`LicenceRegistry`] turns it into a display name for
//! commit messages.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::graph::commit::{Commit, CommitBuilder, CommitMessage};
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::repository::Repository;
use crate::graph::types::{validate_sha256_hex, CommitId, RefName, Signature};

/// Resolves licence hashes to human readable names.
pub trait LicenceRegistry {
    fn licence_name(&self, sha256: &str) -> Option<String>;
}

/// display name for a licence hash
///
/// unset licences read "Not specified"; unknown ones show a short hash prefix
pub fn display_name(registry: &dyn LicenceRegistry, sha256: &str) -> String {
    if sha256.is_empty() {
        return CommitMessage::NO_LICENCE.to_string();
    }
    registry
        .licence_name(sha256)
        .unwrap_or_else(|| sha256.chars().take(8).collect())
}

/// In-memory registry keyed by licence hash.
#[derive(Debug, Clone, Default)]
pub struct MemoryLicenceRegistry {
    names: HashMap<String, String>,
}

impl MemoryLicenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// register a licence by its full text, returning its hash
    pub fn register(&mut self, name: impl Into<String>, text: &[u8]) -> String {
        let sha = hex::encode(Sha256::digest(text));
        self.names.insert(sha.clone(), name.into());
        sha
    }

    pub fn insert(&mut self, sha256: impl Into<String>, name: impl Into<String>) {
        self.names.insert(sha256.into().to_ascii_lowercase(), name.into());
    }

    /// reverse lookup, for callers that only know the licence name
    pub fn sha_for(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(sha, _)| sha.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl LicenceRegistry for MemoryLicenceRegistry {
    fn licence_name(&self, sha256: &str) -> Option<String> {
        self.names.get(&sha256.to_ascii_lowercase()).cloned()
    }
}

/// One branch moved onto a relicensing commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenceChange {
    pub branch: RefName,
    pub old_head: CommitId,
    pub new_head: CommitId,
}

/// Apply a per-branch licence assignment.
///
/// Every branch whose head licence differs from its assignment gets one new
/// commit carrying the same database file under the new licence. Branches
/// whose licence is unchanged are left alone. All assignments are checked and
/// all commits built and checked for id collisions before the repository is
/// touched.
///
/// An empty licence hash means "no licence".
pub fn propagate_licences(
    repo: &mut Repository,
    assignments: &BTreeMap<RefName, String>,
    registry: &dyn LicenceRegistry,
    actor: &Signature,
    now: DateTime<Utc>,
) -> GraphResult<Vec<LicenceChange>> {
    let mut planned: Vec<(RefName, Commit)> = Vec::new();

    for (branch, licence) in assignments {
        let licence = licence.to_ascii_lowercase();
        if !licence.is_empty() {
            validate_sha256_hex(&licence)?;
        }

        let head = repo.head_commit(branch)?;
        if head.licence() == licence {
            continue;
        }

        let message = CommitMessage::licence_changed(
            &display_name(registry, head.licence()),
            &display_name(registry, &licence),
        );
        let commit = CommitBuilder::new()
            .tree(head.tree().with_licence(&licence))
            .parent(head.id().clone())
            .author(actor.clone())
            .committer(actor.clone())
            .timestamp(now)
            .message(message)
            .build()?;
        let stored = repo.commits.find(commit.id());
        let queued = planned.iter().map(|(_, c)| c).find(|c| c.id() == commit.id());
        if stored.into_iter().chain(queued).any(|c| c != &commit) {
            return Err(GraphError::CommitCollision(commit.id().clone()));
        }
        planned.push((branch.clone(), commit));
    }

    let mut changes = Vec::with_capacity(planned.len());
    for (name, commit) in planned {
        let new_head = commit.id().clone();
        repo.commits.put(commit)?;
        let branch = repo.branch_mut(&name)?;
        let old_head = std::mem::replace(&mut branch.head, new_head.clone());
        branch.commit_count += 1;

        tracing::info!(
            repository = %repo.id,
            branch = %name,
            commit = %new_head,
            "branch licence changed"
        );
        changes.push(LicenceChange {
            branch: name,
            old_head,
            new_head,
        });
    }
    Ok(changes)
}
