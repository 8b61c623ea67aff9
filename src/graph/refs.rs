//! Branch, tag and release management.
//!
//! Branches are mutable pointers to the tip of ongoing work. Tags and
//! releases are fixed pointers to a point in history; a release also records
//! the size of the database at that point.
//!
//! Branches, tags and releases share one namespace per repository, so a name
//! can only ever refer to one of them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::error::{GraphError, GraphResult, ObjectKind};
use crate::graph::reachability;
use crate::graph::repository::Repository;
use crate::graph::types::{CommitId, RefName, Signature};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(rename = "commit")]
    pub head: CommitId,
    /// cached number of commits reachable from `head`
    pub commit_count: usize,
    #[serde(default)]
    pub description: String,
}

impl Branch {
    pub fn new(head: CommitId, commit_count: usize, description: impl Into<String>) -> Self {
        Self {
            head,
            commit_count,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub commit: CommitId,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    pub tagger: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub commit: CommitId,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub releaser: Signature,
    /// size of the database file at `commit`
    pub size_bytes: u64,
}

/// Manages a repository's references.
pub struct RefManager;

impl RefManager {
    // ==================== Branches ====================

    /// Create a branch pointing at an existing commit.
    pub fn create_branch(
        repo: &mut Repository,
        name: &RefName,
        commit: &CommitId,
        description: &str,
    ) -> GraphResult<()> {
        repo.ensure_name_free(name)?;
        repo.commits.get(commit)?;
        let commit_count = repo.commits.count(commit)?;

        repo.branches
            .insert(name.clone(), Branch::new(commit.clone(), commit_count, description));
        tracing::info!(repository = %repo.id, branch = %name, commit = %commit, "branch created");
        Ok(())
    }

    /// Rename a branch, carrying the default-branch setting along with it.
    pub fn rename_branch(repo: &mut Repository, old: &RefName, new: &RefName) -> GraphResult<()> {
        repo.branch(old)?;
        if old == new {
            return Ok(());
        }
        repo.ensure_name_free(new)?;

        if let Some(branch) = repo.branches.remove(old) {
            repo.branches.insert(new.clone(), branch);
        }
        if &repo.default_branch == old {
            repo.default_branch = new.clone();
        }
        tracing::info!(repository = %repo.id, from = %old, to = %new, "branch renamed");
        Ok(())
    }

    pub fn set_branch_description(repo: &mut Repository, name: &RefName, description: &str) -> GraphResult<()> {
        repo.branch_mut(name)?.description = description.to_string();
        Ok(())
    }

    /// Delete a branch, pruning commits only it could reach.
    ///
    /// Fails if it is the default branch or if a tag or release would become
    /// unreachable.
    pub fn delete_branch(repo: &mut Repository, name: &RefName) -> GraphResult<usize> {
        let plan = reachability::plan_branch_deletion(repo, name)?;
        Ok(plan.apply(repo))
    }

    pub fn set_default_branch(repo: &mut Repository, name: &RefName) -> GraphResult<()> {
        repo.branch(name)?;
        repo.default_branch = name.clone();
        tracing::info!(repository = %repo.id, branch = %name, "default branch changed");
        Ok(())
    }

    // ==================== Tags ====================

    pub fn create_tag(
        repo: &mut Repository,
        name: &RefName,
        commit: &CommitId,
        message: &str,
        tagger: Signature,
        date: DateTime<Utc>,
    ) -> GraphResult<()> {
        repo.ensure_name_free(name)?;
        Self::ensure_taggable(repo, commit)?;

        repo.tags.insert(
            name.clone(),
            Tag {
                commit: commit.clone(),
                date,
                message: message.to_string(),
                tagger,
            },
        );
        tracing::info!(repository = %repo.id, tag = %name, commit = %commit, "tag created");
        Ok(())
    }

    /// Rename a tag, optionally replacing its message.
    pub fn rename_tag(
        repo: &mut Repository,
        old: &RefName,
        new: &RefName,
        message: Option<&str>,
    ) -> GraphResult<()> {
        repo.tag(old)?;
        if old != new {
            repo.ensure_name_free(new)?;
        }

        if let Some(mut tag) = repo.tags.remove(old) {
            if let Some(message) = message {
                tag.message = message.to_string();
            }
            repo.tags.insert(new.clone(), tag);
        }
        Ok(())
    }

    pub fn delete_tag(repo: &mut Repository, name: &RefName) -> GraphResult<Tag> {
        let tag = repo
            .tags
            .remove(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Tag, name))?;
        tracing::info!(repository = %repo.id, tag = %name, "tag deleted");
        Ok(tag)
    }

    // ==================== Releases ====================

    /// Create a release; the database size is taken from the commit's tree.
    pub fn create_release(
        repo: &mut Repository,
        name: &RefName,
        commit: &CommitId,
        description: &str,
        releaser: Signature,
        date: DateTime<Utc>,
    ) -> GraphResult<()> {
        repo.ensure_name_free(name)?;
        Self::ensure_taggable(repo, commit)?;
        let size_bytes = repo.commits.get(commit)?.tree().database_size();

        repo.releases.insert(
            name.clone(),
            Release {
                commit: commit.clone(),
                date,
                description: description.to_string(),
                releaser,
                size_bytes,
            },
        );
        tracing::info!(repository = %repo.id, release = %name, commit = %commit, "release created");
        Ok(())
    }

    /// Rename a release, optionally replacing its description.
    pub fn rename_release(
        repo: &mut Repository,
        old: &RefName,
        new: &RefName,
        description: Option<&str>,
    ) -> GraphResult<()> {
        repo.release(old)?;
        if old != new {
            repo.ensure_name_free(new)?;
        }

        if let Some(mut release) = repo.releases.remove(old) {
            if let Some(description) = description {
                release.description = description.to_string();
            }
            repo.releases.insert(new.clone(), release);
        }
        Ok(())
    }

    pub fn delete_release(repo: &mut Repository, name: &RefName) -> GraphResult<Release> {
        let release = repo
            .releases
            .remove(name)
            .ok_or_else(|| GraphError::not_found(ObjectKind::Release, name))?;
        tracing::info!(repository = %repo.id, release = %name, "release deleted");
        Ok(release)
    }

    /// tags and releases must sit on a commit some branch can reach
    fn ensure_taggable(repo: &Repository, commit: &CommitId) -> GraphResult<()> {
        repo.commits.get(commit)?;
        if !repo.is_reachable(commit)? {
            return Err(GraphError::Conflict(format!(
                "commit {} isn't reachable from any branch",
                commit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::{fork, linear_repo, name, tagger};
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_create_branch() {
        let (mut repo, ids) = fork();

        RefManager::create_branch(&mut repo, &name("feature"), &ids[1], "work in progress").unwrap();
        let branch = repo.branch(&name("feature")).unwrap();
        assert_eq!(branch.head, ids[1]);
        assert_eq!(branch.commit_count, 2);
        assert_eq!(branch.description, "work in progress");
    }

    #[test]
    fn test_create_branch_errors() {
        let (mut repo, ids) = fork();
        let before = repo.clone();

        let dup = RefManager::create_branch(&mut repo, &name("dev"), &ids[0], "");
        assert!(dup.unwrap_err().is_conflict());

        let clash_with_tag = RefManager::create_branch(&mut repo, &name("v1"), &ids[0], "");
        assert!(matches!(
            clash_with_tag,
            Err(GraphError::NameTaken { existing: ObjectKind::Tag, .. })
        ));

        let unknown = CommitId::from_hex(&"ee".repeat(32)).unwrap();
        let missing = RefManager::create_branch(&mut repo, &name("x"), &unknown, "");
        assert!(missing.unwrap_err().is_not_found());

        assert_eq!(repo, before);
    }

    #[test]
    fn test_rename_default_branch_moves_default() {
        let (mut repo, _) = fork();
        RefManager::rename_branch(&mut repo, &name("main"), &name("trunk")).unwrap();

        assert_eq!(repo.default_branch(), &name("trunk"));
        assert!(repo.branch(&name("main")).is_err());
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_rename_branch_collision() {
        let (mut repo, _) = fork();
        let err = RefManager::rename_branch(&mut repo, &name("dev"), &name("main")).unwrap_err();
        assert!(err.is_conflict());
        assert!(repo.branch(&name("dev")).is_ok());

        let err = RefManager::rename_branch(&mut repo, &name("ghost"), &name("x")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_default_branch_rejected() {
        let mut repo = linear_repo(2);
        let err = RefManager::delete_branch(&mut repo, &name("main")).unwrap_err();
        assert!(err.is_conflict());
        assert!(repo.branch(&name("main")).is_ok());
    }

    #[test]
    fn test_set_default_branch() {
        let (mut repo, _) = fork();
        RefManager::set_default_branch(&mut repo, &name("dev")).unwrap();
        assert_eq!(repo.default_branch(), &name("dev"));

        let err = RefManager::set_default_branch(&mut repo, &name("ghost")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(repo.default_branch(), &name("dev"));
    }

    #[test]
    fn test_tag_lifecycle() {
        let (mut repo, ids) = fork();

        RefManager::create_tag(&mut repo, &name("v0"), &ids[0], "first", tagger(), date()).unwrap();
        assert_eq!(repo.tag(&name("v0")).unwrap().commit, ids[0]);

        RefManager::rename_tag(&mut repo, &name("v0"), &name("v0.1"), Some("renamed")).unwrap();
        let tag = repo.tag(&name("v0.1")).unwrap();
        assert_eq!(tag.message, "renamed");
        assert_eq!(tag.commit, ids[0]);
        assert_eq!(tag.date, date());

        let removed = RefManager::delete_tag(&mut repo, &name("v0.1")).unwrap();
        assert_eq!(removed.commit, ids[0]);
        assert!(RefManager::delete_tag(&mut repo, &name("v0.1"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_tag_and_release_share_namespace() {
        let (mut repo, ids) = fork();

        let err = RefManager::create_release(&mut repo, &name("v1"), &ids[2], "", tagger(), date()).unwrap_err();
        assert!(matches!(err, GraphError::NameTaken { existing: ObjectKind::Tag, .. }));

        RefManager::create_release(&mut repo, &name("r1"), &ids[2], "", tagger(), date()).unwrap();
        let err = RefManager::rename_tag(&mut repo, &name("v1"), &name("r1"), None).unwrap_err();
        assert!(err.is_conflict());
        let err = RefManager::create_tag(&mut repo, &name("dev"), &ids[0], "", tagger(), date()).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_release_records_size() {
        let (mut repo, ids) = fork();
        let expected = repo.commits().get(&ids[1]).unwrap().tree().database_size();

        RefManager::create_release(&mut repo, &name("2024-q2"), &ids[1], "quarterly", tagger(), date()).unwrap();
        let release = repo.release(&name("2024-q2")).unwrap();
        assert_eq!(release.size_bytes, expected);

        RefManager::rename_release(&mut repo, &name("2024-q2"), &name("Q2"), None).unwrap();
        let release = repo.release(&name("Q2")).unwrap();
        assert_eq!(release.description, "quarterly");
        assert_eq!(release.size_bytes, expected);

        RefManager::delete_release(&mut repo, &name("Q2")).unwrap();
        assert!(repo.releases().is_empty());
    }

    #[test]
    fn test_tag_unknown_commit() {
        let (mut repo, _) = fork();
        let unknown = CommitId::from_hex(&"ee".repeat(32)).unwrap();
        let err = RefManager::create_tag(&mut repo, &name("t"), &unknown, "", tagger(), date()).unwrap_err();
        assert!(err.is_not_found());
    }
}
