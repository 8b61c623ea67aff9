//! The repository aggregate: one hosted database's full commit graph.
//!
//! A `Repository` is loaded wholesale, mutated in memory by the engine and
//! written back wholesale. Every public mutation checks all of its
//! preconditions before touching any field, so a returned error always means
//! the repository is exactly as it was.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::commit::Commit;
use crate::graph::commits::CommitStore;
use crate::graph::error::{GraphError, GraphResult, ObjectKind};
use crate::graph::refs::{Branch, Release, Tag};
use crate::graph::types::{CommitId, RefName, RepositoryId};

/// A hosted database and its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub(crate) id: RepositoryId,
    pub(crate) commits: CommitStore,
    pub(crate) branches: BTreeMap<RefName, Branch>,
    #[serde(default)]
    pub(crate) tags: BTreeMap<RefName, Tag>,
    #[serde(default)]
    pub(crate) releases: BTreeMap<RefName, Release>,
    pub(crate) default_branch: RefName,
    /// table shown first when browsing the default branch
    #[serde(default)]
    pub(crate) default_table: Option<String>,
    #[serde(default)]
    pub(crate) forked_from: Option<RepositoryId>,
}

impl Repository {
    /// Create a repository whose default branch points at a root commit.
    pub fn create(id: RepositoryId, default_branch: RefName, root: Commit) -> GraphResult<Self> {
        if !root.is_root() {
            return Err(GraphError::InvalidRequest(
                "the first commit of a repository can't have a parent".to_string(),
            ));
        }

        let head = root.id().clone();
        let mut commits = CommitStore::new();
        commits.put(root)?;

        let mut branches = BTreeMap::new();
        branches.insert(default_branch.clone(), Branch::new(head, 1, ""));

        Ok(Self {
            id,
            commits,
            branches,
            tags: BTreeMap::new(),
            releases: BTreeMap::new(),
            default_branch,
            default_table: None,
            forked_from: None,
        })
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    pub fn branches(&self) -> &BTreeMap<RefName, Branch> {
        &self.branches
    }

    pub fn tags(&self) -> &BTreeMap<RefName, Tag> {
        &self.tags
    }

    pub fn releases(&self) -> &BTreeMap<RefName, Release> {
        &self.releases
    }

    pub fn default_branch(&self) -> &RefName {
        &self.default_branch
    }

    pub fn default_table(&self) -> Option<&str> {
        self.default_table.as_deref()
    }

    pub fn set_default_table(&mut self, table: Option<String>) {
        self.default_table = table;
    }

    pub fn forked_from(&self) -> Option<&RepositoryId> {
        self.forked_from.as_ref()
    }

    /// Copy this repository under a new owner, keeping its database name.
    ///
    /// Commits, branches, tags and releases are shared by value; the fork
    /// remembers where it came from.
    pub fn fork(&self, owner: &str) -> GraphResult<Repository> {
        let id = RepositoryId::new(owner, self.id.database.as_str())?;
        if id == self.id {
            return Err(GraphError::Conflict(format!("{} can't be forked onto itself", self.id)));
        }
        let mut fork = self.clone();
        fork.id = id;
        fork.forked_from = Some(self.id.clone());
        tracing::info!(repository = %self.id, fork = %fork.id, "repository forked");
        Ok(fork)
    }

    /// apply the configured graph-walk cap
    pub fn set_walk_limit(&mut self, limit: usize) {
        self.commits.set_walk_limit(limit);
    }

    pub fn branch(&self, name: &RefName) -> GraphResult<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Branch, name))
    }

    pub(crate) fn branch_mut(&mut self, name: &RefName) -> GraphResult<&mut Branch> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Branch, name))
    }

    pub fn tag(&self, name: &RefName) -> GraphResult<&Tag> {
        self.tags
            .get(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Tag, name))
    }

    pub fn release(&self, name: &RefName) -> GraphResult<&Release> {
        self.releases
            .get(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Release, name))
    }

    /// the commit a branch currently points at
    pub fn head_commit(&self, branch: &RefName) -> GraphResult<&Commit> {
        let branch = self.branch(branch)?;
        self.commit_at_head(&branch.head)
    }

    /// resolve a stored reference; a dangling one means corrupted metadata
    pub(crate) fn commit_at_head(&self, head: &CommitId) -> GraphResult<&Commit> {
        self.commits.find(head).ok_or_else(|| {
            tracing::error!(repository = %self.id, commit = %head, "reference points at a missing commit");
            GraphError::BrokenHistory {
                commit: "(reference head)".to_string(),
                missing_parent: head.to_string(),
            }
        })
    }

    /// which kind of reference currently owns `name`, if any
    ///
    /// branches, tags and releases share one namespace
    pub fn name_owner(&self, name: &RefName) -> Option<ObjectKind> {
        if self.branches.contains_key(name) {
            Some(ObjectKind::Branch)
        } else if self.tags.contains_key(name) {
            Some(ObjectKind::Tag)
        } else if self.releases.contains_key(name) {
            Some(ObjectKind::Release)
        } else {
            None
        }
    }

    pub(crate) fn ensure_name_free(&self, name: &RefName) -> GraphResult<()> {
        match self.name_owner(name) {
            Some(existing) => Err(GraphError::NameTaken {
                name: name.to_string(),
                existing,
            }),
            None => Ok(()),
        }
    }

    /// the commits of a branch, newest first
    pub fn branch_history(&self, branch: &RefName) -> GraphResult<Vec<&Commit>> {
        let head = &self.branch(branch)?.head;
        self.commits.ancestors(head)
    }

    /// check whether a commit is in the history of a branch
    pub fn is_commit_in_branch_history(&self, branch: &RefName, commit: &CommitId) -> GraphResult<bool> {
        let head = &self.branch(branch)?.head;
        for c in self.commits.history(head) {
            if c?.id() == commit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// union of the ancestor chains of every branch except `excluded`
    pub(crate) fn reachable_from_branches(&self, excluded: Option<&RefName>) -> GraphResult<HashSet<CommitId>> {
        let mut reachable = HashSet::new();
        for (name, branch) in &self.branches {
            if Some(name) == excluded {
                continue;
            }
            for commit in self.commits.history(&branch.head) {
                let commit = commit?;
                // everything older is already in the set
                if !reachable.insert(commit.id().clone()) {
                    break;
                }
            }
        }
        Ok(reachable)
    }

    /// check whether any branch can reach `commit`
    pub fn is_reachable(&self, commit: &CommitId) -> GraphResult<bool> {
        for branch in self.branches.values() {
            for c in self.commits.history(&branch.head) {
                if c?.id() == commit {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// check the repository invariants, returning every violation found
    pub fn verify(&self) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();

        for commit in self.commits.iter() {
            if let Some(parent) = commit.parent() {
                if !self.commits.contains(parent) {
                    issues.push(IntegrityIssue::MissingParent {
                        commit: commit.id().clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }

        for id in self.commits.verify_ids() {
            issues.push(IntegrityIssue::HashMismatch { commit: id });
        }

        if !self.branches.contains_key(&self.default_branch) {
            issues.push(IntegrityIssue::MissingDefaultBranch {
                name: self.default_branch.clone(),
            });
        }

        for (name, branch) in &self.branches {
            if !self.commits.contains(&branch.head) {
                issues.push(IntegrityIssue::DanglingReference {
                    kind: ObjectKind::Branch,
                    name: name.clone(),
                    commit: branch.head.clone(),
                });
                continue;
            }
            if let Ok(actual) = self.commits.count(&branch.head) {
                if actual != branch.commit_count {
                    issues.push(IntegrityIssue::CommitCountMismatch {
                        branch: name.clone(),
                        cached: branch.commit_count,
                        actual,
                    });
                }
            }
        }

        let reachable = match self.reachable_from_branches(None) {
            Ok(set) => set,
            // the per-commit parent check above already reported the break
            Err(_) => return issues,
        };

        let refs = self
            .tags
            .iter()
            .map(|(n, t)| (ObjectKind::Tag, n, &t.commit))
            .chain(self.releases.iter().map(|(n, r)| (ObjectKind::Release, n, &r.commit)));
        for (kind, name, commit) in refs {
            if !self.commits.contains(commit) {
                issues.push(IntegrityIssue::DanglingReference {
                    kind,
                    name: name.clone(),
                    commit: commit.clone(),
                });
            } else if !reachable.contains(commit) {
                issues.push(IntegrityIssue::UnreachableReference {
                    kind,
                    name: name.clone(),
                    commit: commit.clone(),
                });
            }
        }

        let mut orphans: Vec<&CommitId> = self
            .commits
            .iter()
            .map(Commit::id)
            .filter(|id| !reachable.contains(*id))
            .collect();
        orphans.sort();
        issues.extend(
            orphans
                .into_iter()
                .map(|id| IntegrityIssue::UnreachableCommit { commit: id.clone() }),
        );

        issues
    }
}

/// A violated repository invariant, as reported by [`Repository::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    MissingParent { commit: CommitId, parent: CommitId },
    HashMismatch { commit: CommitId },
    MissingDefaultBranch { name: RefName },
    DanglingReference { kind: ObjectKind, name: RefName, commit: CommitId },
    UnreachableReference { kind: ObjectKind, name: RefName, commit: CommitId },
    UnreachableCommit { commit: CommitId },
    CommitCountMismatch { branch: RefName, cached: usize, actual: usize },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParent { commit, parent } => {
                write!(f, "commit {} references missing parent {}", commit, parent)
            }
            Self::HashMismatch { commit } => write!(f, "commit {} doesn't match its content hash", commit),
            Self::MissingDefaultBranch { name } => write!(f, "default branch '{}' doesn't exist", name),
            Self::DanglingReference { kind, name, commit } => {
                write!(f, "{} '{}' points at missing commit {}", kind, name, commit)
            }
            Self::UnreachableReference { kind, name, commit } => {
                write!(f, "{} '{}' points at commit {} which no branch reaches", kind, name, commit)
            }
            Self::UnreachableCommit { commit } => write!(f, "commit {} isn't reachable from any branch", commit),
            Self::CommitCountMismatch { branch, cached, actual } => write!(
                f,
                "branch '{}' records {} commits but has {}",
                branch, cached, actual
            ),
        }
    }
}
