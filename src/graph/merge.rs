//! Fast-forward merging between branches, possibly of different repositories.
//!
//! Only fast-forwards are supported: the destination head must appear in the
//! source branch's history, and the commits newer than it are copied into the
//! destination unchanged. There is no three-way merge.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::commit::Commit;
use crate::graph::error::{GraphError, GraphResult};
use crate::graph::repository::Repository;
use crate::graph::types::{CommitId, RefName, RepositoryId, Signature};

/// How a source branch relates to a destination branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    /// both branches point at the same commit
    UpToDate,
    /// the destination head is in the source history
    FastForward,
    /// the destination has commits the source doesn't
    Diverged,
}

/// Result of comparing two branch histories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// the destination head when it is in the source history, `None` when diverged
    pub ancestor: Option<CommitId>,
    /// commits newer than `ancestor` on the source branch, oldest first
    pub commits: Vec<Commit>,
    pub kind: DivergenceKind,
}

impl Divergence {
    pub fn is_fast_forward(&self) -> bool {
        self.kind != DivergenceKind::Diverged
    }
}

/// Compare a source branch against a destination branch.
pub fn find_divergence(
    src: &Repository,
    src_branch: &RefName,
    dest: &Repository,
    dest_branch: &RefName,
) -> GraphResult<Divergence> {
    let src_head = src.branch(src_branch)?.head.clone();
    let dest_head = dest.branch(dest_branch)?.head.clone();

    let mut commits = Vec::new();
    let mut ancestor = None;
    for commit in src.commits.history(&src_head) {
        let commit = commit?;
        if commit.id() == &dest_head {
            ancestor = Some(dest_head.clone());
            break;
        }
        commits.push(commit.clone());
    }

    let divergence = match ancestor {
        Some(_) => {
            commits.reverse();
            let kind = if commits.is_empty() {
                DivergenceKind::UpToDate
            } else {
                DivergenceKind::FastForward
            };
            Divergence { ancestor, commits, kind }
        }
        None => Divergence {
            ancestor: None,
            commits: Vec::new(),
            kind: DivergenceKind::Diverged,
        },
    };

    tracing::debug!(
        source = %src.id,
        source_branch = %src_branch,
        destination = %dest.id,
        destination_branch = %dest_branch,
        kind = ?divergence.kind,
        commits = divergence.commits.len(),
        "divergence computed"
    );
    Ok(divergence)
}

/// An incoming commit whose licence differs from the destination's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenceMismatch {
    pub commit: CommitId,
    pub incoming: String,
    pub destination: String,
}

/// What a successful merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub new_head: CommitId,
    pub commits_added: usize,
    /// informational, never blocks the merge
    pub licence_mismatches: Vec<LicenceMismatch>,
}

/// Fast-forward `dest_branch` over `commits` (oldest first).
///
/// The first commit's parent must be the current destination head and each
/// following commit must build on the one before it.
pub fn merge(
    dest: &mut Repository,
    dest_branch: &RefName,
    commits: &[Commit],
    actor: &Signature,
) -> GraphResult<MergeOutcome> {
    let head = dest.branch(dest_branch)?.head.clone();
    let Some(first) = commits.first() else {
        return Ok(MergeOutcome {
            new_head: head,
            commits_added: 0,
            licence_mismatches: Vec::new(),
        });
    };

    if first.parent() != Some(&head) {
        return Err(GraphError::NotFastForward);
    }
    for pair in commits.windows(2) {
        if pair[1].parent() != Some(pair[0].id()) {
            return Err(GraphError::InvalidRequest(format!(
                "commit {} doesn't follow {} in the merged history",
                pair[1].id().short(),
                pair[0].id().short()
            )));
        }
    }
    for commit in commits {
        if !commit.verify_id() {
            return Err(GraphError::InvalidRequest(format!(
                "commit {} doesn't match its content hash",
                commit.id()
            )));
        }
        if let Some(existing) = dest.commits.find(commit.id()) {
            if existing != commit {
                return Err(GraphError::CommitCollision(commit.id().clone()));
            }
        }
    }

    let dest_licence = dest.commit_at_head(&head)?.licence().to_string();
    let licence_mismatches = commits
        .iter()
        .filter(|c| c.licence() != dest_licence)
        .map(|c| LicenceMismatch {
            commit: c.id().clone(),
            incoming: c.licence().to_string(),
            destination: dest_licence.clone(),
        })
        .collect();

    // checked above, nothing below can fail
    for commit in commits {
        dest.commits.put(commit.clone())?;
    }
    let new_head = commits[commits.len() - 1].id().clone();
    let branch = dest.branch_mut(dest_branch)?;
    branch.head = new_head.clone();
    branch.commit_count += commits.len();

    tracing::info!(
        repository = %dest.id,
        branch = %dest_branch,
        new_head = %new_head,
        commits = commits.len(),
        actor = %actor,
        "branch fast-forwarded"
    );
    Ok(MergeOutcome {
        new_head,
        commits_added: commits.len(),
        licence_mismatches,
    })
}

/// Compare and merge in one step, rejecting diverged branches.
pub fn fast_forward(
    src: &Repository,
    src_branch: &RefName,
    dest: &mut Repository,
    dest_branch: &RefName,
    actor: &Signature,
) -> GraphResult<MergeOutcome> {
    let divergence = find_divergence(src, src_branch, dest, dest_branch)?;
    if !divergence.is_fast_forward() {
        return Err(GraphError::NotFastForward);
    }
    merge(dest, dest_branch, &divergence.commits, actor)
}

// ==================== Merge requests ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MergeRequestState {
    Open,
    ClosedWithMerge,
    ClosedWithoutMerge,
}

impl From<MergeRequestState> for u8 {
    fn from(state: MergeRequestState) -> u8 {
        match state {
            MergeRequestState::Open => 0,
            MergeRequestState::ClosedWithMerge => 1,
            MergeRequestState::ClosedWithoutMerge => 2,
        }
    }
}

impl TryFrom<u8> for MergeRequestState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MergeRequestState::Open),
            1 => Ok(MergeRequestState::ClosedWithMerge),
            2 => Ok(MergeRequestState::ClosedWithoutMerge),
            other => Err(format!("unknown merge request state {}", other)),
        }
    }
}

impl fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeRequestState::Open => "open",
            MergeRequestState::ClosedWithMerge => "merged",
            MergeRequestState::ClosedWithoutMerge => "closed",
        };
        f.write_str(s)
    }
}

/// A proposal to fast-forward a destination branch over a source branch.
///
/// `commits` is captured when the request is opened; merging re-checks that
/// the destination hasn't moved since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub source: RepositoryId,
    pub source_branch: RefName,
    pub dest_branch: RefName,
    pub commits: Vec<Commit>,
    pub state: MergeRequestState,
}

impl MergeRequest {
    /// open a request, failing if there is nothing to merge or the branches diverged
    pub fn open(
        src: &Repository,
        src_branch: &RefName,
        dest: &Repository,
        dest_branch: &RefName,
    ) -> GraphResult<Self> {
        if src.branch(src_branch)?.head == dest.branch(dest_branch)?.head {
            return Err(GraphError::Conflict(
                "source and destination commits are identical, no merge needs doing".to_string(),
            ));
        }

        let divergence = find_divergence(src, src_branch, dest, dest_branch)?;
        if !divergence.is_fast_forward() {
            return Err(GraphError::NotFastForward);
        }

        Ok(Self {
            source: src.id.clone(),
            source_branch: src_branch.clone(),
            dest_branch: dest_branch.clone(),
            commits: divergence.commits,
            state: MergeRequestState::Open,
        })
    }

    pub fn is_open(&self) -> bool {
        self.state == MergeRequestState::Open
    }

    /// apply the request to the destination repository and close it
    pub fn merge_into(&mut self, dest: &mut Repository, actor: &Signature) -> GraphResult<MergeOutcome> {
        self.ensure_open()?;
        let outcome = merge(dest, &self.dest_branch, &self.commits, actor)?;
        self.state = MergeRequestState::ClosedWithMerge;
        Ok(outcome)
    }

    /// close the request without merging
    pub fn close(&mut self) -> GraphResult<()> {
        self.ensure_open()?;
        self.state = MergeRequestState::ClosedWithoutMerge;
        Ok(())
    }

    fn ensure_open(&self) -> GraphResult<()> {
        if !self.is_open() {
            return Err(GraphError::Conflict(format!("merge request is already {}", self.state)));
        }
        Ok(())
    }
}
