//! Commit graph error types
//!
//! Every failure the engine can report falls into one of four classes:
//! validation, not-found, conflict, and fatal (corrupted history).
//! Nothing is mutated when any of them is returned.

use std::fmt;

use thiserror::Error;

use crate::graph::types::{CommitId, InvalidNameError};

/// which kind of named object a lookup was for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Branch,
    Tag,
    Release,
    Commit,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Branch => "branch",
            ObjectKind::Tag => "tag",
            ObjectKind::Release => "release",
            ObjectKind::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// the main error type for commit graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// a caller-supplied name or id failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a request that is malformed independent of repository state
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// an unknown branch, tag, release or commit
    #[error("{kind} not found: {name}")]
    NotFound { kind: ObjectKind, name: String },

    /// the name is already taken by a branch, tag or release
    #[error("a {existing} named '{name}' already exists")]
    NameTaken { name: String, existing: ObjectKind },

    /// the operation would leave tags or releases unreachable from every branch
    #[error("{}", orphan_message(.tags, .releases))]
    OrphanedReferences {
        tags: Vec<String>,
        releases: Vec<String>,
    },

    /// a merge was attempted that cannot be applied by fast-forwarding
    #[error("source branch is not a direct descendant of the destination branch.")]
    NotFastForward,

    /// any other rejected state transition
    #[error("conflict: {0}")]
    Conflict(String),

    /// two different commits hashed to the same id
    #[error("commit {0} already exists with different content")]
    CommitCollision(CommitId),

    /// a parent pointer leads to a commit that isn't in the commit map
    #[error("broken commit history: commit {commit} references missing parent {missing_parent}")]
    BrokenHistory {
        commit: String,
        missing_parent: String,
    },

    /// a graph walk exceeded the configured depth (cyclic or runaway history)
    #[error("commit history from {head} exceeds {limit} commits, refusing to continue")]
    HistoryTooDeep { head: CommitId, limit: usize },
}

fn orphan_message(tags: &[String], releases: &[String]) -> String {
    let mut parts = Vec::new();
    if !tags.is_empty() {
        parts.push(format!(
            "{}: {}",
            if tags.len() == 1 { "tag" } else { "tags" },
            quoted_list(tags)
        ));
    }
    if !releases.is_empty() {
        parts.push(format!(
            "{}: {}",
            if releases.len() == 1 { "release" } else { "releases" },
            quoted_list(releases)
        ));
    }
    let total = tags.len() + releases.len();
    format!(
        "the following {} would become unreachable and must be deleted first: {}",
        if total == 1 { "reference" } else { "references" },
        parts.join("; ")
    )
}

fn quoted_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{}'", n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl GraphError {
    pub(crate) fn not_found(kind: ObjectKind, name: impl fmt::Display) -> Self {
        GraphError::NotFound {
            kind,
            name: name.to_string(),
        }
    }

    /// check if the input was rejected before looking at the graph
    pub fn is_validation(&self) -> bool {
        matches!(self, GraphError::InvalidName(_) | GraphError::InvalidRequest(_))
    }

    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound { .. })
    }

    /// check if this error is a conflict
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GraphError::NameTaken { .. }
                | GraphError::OrphanedReferences { .. }
                | GraphError::NotFastForward
                | GraphError::Conflict(_)
                | GraphError::CommitCollision(_)
        )
    }

    /// check if this error points at corrupted data that needs an administrator
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphError::BrokenHistory { .. } | GraphError::HistoryTooDeep { .. }
        )
    }
}

/// result type alias for commit graph operations
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = GraphError::not_found(ObjectKind::Branch, "dev");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert_eq!(not_found.to_string(), "branch not found: dev");

        let conflict = GraphError::NotFastForward;
        assert!(conflict.is_conflict());
        assert!(!conflict.is_fatal());

        let fatal = GraphError::BrokenHistory {
            commit: "a".into(),
            missing_parent: "b".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_conflict());

        let invalid = GraphError::from(InvalidNameError::Empty);
        assert!(invalid.is_validation());
    }

    #[test]
    fn test_orphan_message_names_every_reference() {
        let single = GraphError::OrphanedReferences {
            tags: vec!["v1".into()],
            releases: vec![],
        };
        assert_eq!(
            single.to_string(),
            "the following reference would become unreachable and must be deleted first: tag: 'v1'"
        );

        let many = GraphError::OrphanedReferences {
            tags: vec!["v1".into(), "v2".into()],
            releases: vec!["2024-q1".into()],
        };
        let msg = many.to_string();
        assert!(msg.contains("references"));
        assert!(msg.contains("tags: 'v1', 'v2'"));
        assert!(msg.contains("release: '2024-q1'"));
    }

    #[test]
    fn test_not_fast_forward_message() {
        assert_eq!(
            GraphError::NotFastForward.to_string(),
            "source branch is not a direct descendant of the destination branch."
        );
    }
}
