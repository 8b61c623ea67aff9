//! Commit creation.
//!
//! commits are the atomic units of history. In a hosted database:
//! - every upload creates a commit
//! - a licence change creates a commit per affected branch
//! - merges copy commits from the source repository as-is
//!
//! A `Commit` is never mutated after construction; its id is computed by the
//! builder from every other field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::hash::{self, CommitFields};
use crate::graph::tree::Tree;
use crate::graph::types::{CommitId, Signature};

/// An immutable commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    id: CommitId,
    /// stored as an empty string for root commits
    #[serde(with = "parent_serde")]
    parent: Option<CommitId>,
    tree: Tree,
    author: Signature,
    committer: Signature,
    timestamp: DateTime<Utc>,
    message: String,
}

impl Commit {
    pub fn id(&self) -> &CommitId {
        &self.id
    }

    pub fn parent(&self) -> Option<&CommitId> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn author(&self) -> &Signature {
        &self.author
    }

    pub fn committer(&self) -> &Signature {
        &self.committer
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    /// licence recorded in this commit's tree (empty string when unset)
    pub fn licence(&self) -> &str {
        self.tree.licence().unwrap_or("")
    }

    fn fields(&self) -> CommitFields<'_> {
        CommitFields {
            parent: self.parent.as_ref(),
            tree: self.tree.id(),
            author: &self.author,
            committer: &self.committer,
            timestamp: &self.timestamp,
            message: &self.message,
        }
    }

    /// recompute both hashes and compare them with the stored ids
    pub fn verify_id(&self) -> bool {
        self.tree.verify_id() && hash::commit_id(self.fields()) == self.id
    }
}

/// builder for creating commits with a fluent interface
#[derive(Debug, Default)]
pub struct CommitBuilder {
    tree: Option<Tree>,
    parent: Option<CommitId>,
    message: String,
    author: Option<Signature>,
    committer: Option<Signature>,
    timestamp: Option<DateTime<Utc>>,
}

impl CommitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree: Tree) -> Self {
        self.tree = Some(tree);
        self
    }

    /// set the parent commit (leave unset for a root commit)
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn parent_opt(mut self, parent: Option<CommitId>) -> Self {
        self.parent = parent;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    /// defaults to the author
    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// defaults to the current time
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// create the commit, computing its id
    pub fn build(self) -> GraphResult<Commit> {
        let tree = self
            .tree
            .ok_or_else(|| GraphError::InvalidRequest("commit requires a tree".to_string()))?;
        let author = self
            .author
            .ok_or_else(|| GraphError::InvalidRequest("commit requires an author".to_string()))?;
        if author.name.is_empty() || author.email.is_empty() {
            return Err(GraphError::InvalidRequest(
                "commit author needs both a name and an email address".to_string(),
            ));
        }
        let committer = self.committer.unwrap_or_else(|| author.clone());
        let timestamp = self.timestamp.unwrap_or_else(Utc::now);

        let id = hash::commit_id(CommitFields {
            parent: self.parent.as_ref(),
            tree: tree.id(),
            author: &author,
            committer: &committer,
            timestamp: &timestamp,
            message: &self.message,
        });

        Ok(Commit {
            id,
            parent: self.parent,
            tree,
            author,
            committer,
            timestamp,
            message: self.message,
        })
    }
}

/// message formatting for generated commits
pub struct CommitMessage;

impl CommitMessage {
    /// placeholder name for an unset licence
    pub const NO_LICENCE: &'static str = "Not specified";

    /// message for a commit created by a settings-driven licence change
    pub fn licence_changed(old: &str, new: &str) -> String {
        format!("Licence changed from '{}' to '{}'.", old, new)
    }

    /// message for an upload that also changes the licence
    pub fn upload_licence_changed(old: &str, new: &str) -> String {
        format!("Database licence changed from '{}' to '{}'.", old, new)
    }

    /// message for the first upload of a database
    pub fn initial_upload(licence: Option<&str>) -> String {
        match licence {
            Some(name) if name != Self::NO_LICENCE => {
                format!("Initial database upload, using licence {}.", name)
            }
            _ => "Initial database upload, licence not specified.".to_string(),
        }
    }
}

mod parent_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::graph::types::CommitId;

    pub fn serialize<S: Serializer>(parent: &Option<CommitId>, s: S) -> Result<S::Ok, S::Error> {
        match parent {
            Some(id) => s.serialize_str(id.as_str()),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<CommitId>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        CommitId::from_hex(&raw)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tree::TreeEntry;
    use chrono::TimeZone;

    fn tree() -> Tree {
        Tree::new(vec![TreeEntry::database(
            "db.sqlite",
            "ab".repeat(32),
            10,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            "",
        )])
    }

    fn alice() -> Signature {
        Signature::new("Alice", "alice@example.org")
    }

    #[test]
    fn test_commit_builder() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let root = CommitBuilder::new()
            .tree(tree())
            .author(alice())
            .timestamp(ts)
            .message("Initial commit\n\nmore detail")
            .build()
            .unwrap();

        assert!(root.is_root());
        assert_eq!(root.committer(), &alice());
        assert_eq!(root.summary(), "Initial commit");
        assert!(root.verify_id());

        let child = CommitBuilder::new()
            .tree(tree())
            .parent(root.id().clone())
            .author(alice())
            .timestamp(ts)
            .message("Second")
            .build()
            .unwrap();
        assert_eq!(child.parent(), Some(root.id()));
        assert_ne!(child.id(), root.id());
    }

    #[test]
    fn test_builder_requires_tree_and_author() {
        let missing_tree = CommitBuilder::new().author(alice()).build();
        assert!(matches!(missing_tree, Err(GraphError::InvalidRequest(_))));

        let missing_author = CommitBuilder::new().tree(tree()).build();
        assert!(matches!(missing_author, Err(GraphError::InvalidRequest(_))));

        let blank_email = CommitBuilder::new()
            .tree(tree())
            .author(Signature::new("Alice", ""))
            .build();
        assert!(blank_email.is_err());
    }

    #[test]
    fn test_root_parent_serializes_as_empty_string() {
        let root = CommitBuilder::new()
            .tree(tree())
            .author(alice())
            .build()
            .unwrap();
        let json = serde_json::to_value(&root).unwrap();
        assert_eq!(json["parent"], serde_json::json!(""));

        let back: Commit = serde_json::from_value(json).unwrap();
        assert_eq!(back, root);
        assert!(back.verify_id());
    }

    #[test]
    fn test_commit_messages() {
        assert_eq!(
            CommitMessage::licence_changed("CC0", "CC-BY-4.0"),
            "Licence changed from 'CC0' to 'CC-BY-4.0'."
        );
        assert_eq!(
            CommitMessage::initial_upload(Some("CC0")),
            "Initial database upload, using licence CC0."
        );
        assert_eq!(
            CommitMessage::initial_upload(None),
            "Initial database upload, licence not specified."
        );
    }
}
