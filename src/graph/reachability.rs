//! Deletion safety: which commits a branch owns exclusively, and whether
//! removing them would strand a tag or release.
//!
//! Every deletion runs in two steps. A `plan_*` function inspects the
//! repository without changing it and either rejects the request or returns a
//! plan; `apply` then performs the mutation and cannot fail. A rejected plan
//! therefore never leaves a partially modified repository behind.
//!
//! Branch deletion and commit rewinds follow the same rule: no tag or release
//! may end up unreachable from every branch.

use std::collections::HashSet;

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::repository::Repository;
use crate::graph::tree::Tree;
use crate::graph::types::{CommitId, RefName};

/// Answers whether a database snapshot contains a given table.
///
/// Backed by whatever can read the SQLite file a tree points at.
pub trait TableCatalog {
    fn contains_table(&self, tree: &Tree, table: &str) -> GraphResult<bool>;
}

impl<F> TableCatalog for F
where
    F: Fn(&Tree, &str) -> GraphResult<bool>,
{
    fn contains_table(&self, tree: &Tree, table: &str) -> GraphResult<bool> {
        self(tree, table)
    }
}

/// Catalog for callers that can't inspect database files; keeps the setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeTablesPresent;

impl TableCatalog for AssumeTablesPresent {
    fn contains_table(&self, _tree: &Tree, _table: &str) -> GraphResult<bool> {
        Ok(true)
    }
}

/// tags and releases (sorted by name) that point into `doomed`
fn references_into(repo: &Repository, doomed: &HashSet<CommitId>) -> (Vec<String>, Vec<String>) {
    let tags = repo
        .tags
        .iter()
        .filter(|(_, t)| doomed.contains(&t.commit))
        .map(|(n, _)| n.to_string())
        .collect();
    let releases = repo
        .releases
        .iter()
        .filter(|(_, r)| doomed.contains(&r.commit))
        .map(|(n, _)| n.to_string())
        .collect();
    (tags, releases)
}

fn reject_orphans(repo: &Repository, op: &str, doomed: &HashSet<CommitId>) -> GraphResult<()> {
    let (tags, releases) = references_into(repo, doomed);
    if tags.is_empty() && releases.is_empty() {
        return Ok(());
    }
    tracing::warn!(
        repository = %repo.id,
        op,
        tags = ?tags,
        releases = ?releases,
        "rejected: tags or releases would become unreachable"
    );
    Err(GraphError::OrphanedReferences { tags, releases })
}

// ==================== Branch deletion ====================

/// An accepted branch deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDeletion {
    pub branch: RefName,
    /// commits no other branch reaches
    pub prune: HashSet<CommitId>,
}

/// Work out what deleting `branch` would remove.
pub fn plan_branch_deletion(repo: &Repository, branch: &RefName) -> GraphResult<BranchDeletion> {
    let head = repo.branch(branch)?.head.clone();
    if &repo.default_branch == branch {
        return Err(GraphError::Conflict(format!(
            "'{}' is the default branch and can't be deleted",
            branch
        )));
    }

    let mut own = repo.commits.ancestor_ids(&head)?;

    'branches: for (name, other) in &repo.branches {
        if name == branch {
            continue;
        }
        for commit in repo.commits.history(&other.head) {
            if own.is_empty() {
                break 'branches;
            }
            own.remove(commit?.id());
        }
    }
    tracing::debug!(repository = %repo.id, branch = %branch, exclusive = own.len(), "branch deletion planned");

    reject_orphans(repo, "delete branch", &own)?;

    Ok(BranchDeletion {
        branch: branch.clone(),
        prune: own,
    })
}

impl BranchDeletion {
    /// remove the branch and its exclusive commits, returning how many were pruned
    pub fn apply(self, repo: &mut Repository) -> usize {
        repo.branches.remove(&self.branch);
        let pruned = repo.commits.prune(&self.prune);
        tracing::info!(repository = %repo.id, branch = %self.branch, pruned, "branch deleted");
        pruned
    }
}

// ==================== Head commit removal ====================

/// An accepted removal of a branch's head commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRewind {
    pub branch: RefName,
    pub removed: CommitId,
    pub new_head: CommitId,
    /// the removed commit is on no other branch
    pub prune: bool,
    /// the default table doesn't exist in the new head's database
    pub clear_default_table: bool,
}

/// Work out whether the head commit of `branch` can be removed.
///
/// Only the newest commit of a branch can go, and never a root commit.
pub fn plan_commit_rewind(
    repo: &Repository,
    branch: &RefName,
    commit: &CommitId,
    tables: &dyn TableCatalog,
) -> GraphResult<CommitRewind> {
    let head = repo.branch(branch)?.head.clone();
    let target = repo.commits.get(commit)?;

    let parent = target.parent().cloned().ok_or_else(|| {
        GraphError::Conflict("the first commit of a history can't be removed".to_string())
    })?;
    if commit != &head {
        return Err(GraphError::Conflict(format!(
            "only the most recent commit of branch '{}' can be removed",
            branch
        )));
    }

    let elsewhere = repo.reachable_from_branches(Some(branch))?;
    let mut doomed = HashSet::new();
    if !elsewhere.contains(commit) {
        doomed.insert(commit.clone());
    }
    reject_orphans(repo, "delete commit", &doomed)?;

    let mut clear_default_table = false;
    if &repo.default_branch == branch {
        if let Some(table) = &repo.default_table {
            let parent_tree = repo.commits.get(&parent)?.tree();
            clear_default_table = !tables.contains_table(parent_tree, table)?;
        }
    }

    Ok(CommitRewind {
        branch: branch.clone(),
        removed: commit.clone(),
        new_head: parent,
        prune: !doomed.is_empty(),
        clear_default_table,
    })
}

impl CommitRewind {
    pub fn apply(self, repo: &mut Repository) {
        if let Some(branch) = repo.branches.get_mut(&self.branch) {
            branch.head = self.new_head.clone();
            branch.commit_count = branch.commit_count.saturating_sub(1);
        }
        if self.clear_default_table {
            repo.default_table = None;
        }
        if self.prune {
            repo.commits.prune([&self.removed]);
        }
        tracing::info!(
            repository = %repo.id,
            branch = %self.branch,
            removed = %self.removed,
            new_head = %self.new_head,
            pruned = self.prune,
            "head commit removed"
        );
    }
}

/// Remove the head commit of `branch`, returning the commit it was rewound to.
pub fn delete_commit(
    repo: &mut Repository,
    branch: &RefName,
    commit: &CommitId,
    tables: &dyn TableCatalog,
) -> GraphResult<CommitId> {
    let plan = plan_commit_rewind(repo, branch, commit, tables)?;
    let new_head = plan.new_head.clone();
    plan.apply(repo);
    Ok(new_head)
}

// ==================== History rewind ====================

/// An accepted rewind of a branch to an older commit in its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRewind {
    pub branch: RefName,
    pub target: CommitId,
    /// commits newer than `target`, newest first
    pub removed: Vec<CommitId>,
    /// subset of `removed` no other branch reaches
    pub prune: HashSet<CommitId>,
    pub commit_count: usize,
}

impl HistoryRewind {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }

    pub fn apply(self, repo: &mut Repository) {
        if self.is_noop() {
            return;
        }
        if let Some(branch) = repo.branches.get_mut(&self.branch) {
            branch.head = self.target.clone();
            branch.commit_count = self.commit_count;
        }
        let pruned = repo.commits.prune(&self.prune);
        tracing::info!(
            repository = %repo.id,
            branch = %self.branch,
            target = %self.target,
            removed = self.removed.len(),
            pruned,
            "branch history rewound"
        );
    }
}

/// Work out what rewinding `branch` back to `target` would remove.
pub fn plan_history_rewind(repo: &Repository, branch: &RefName, target: &CommitId) -> GraphResult<HistoryRewind> {
    let head = repo.branch(branch)?.head.clone();
    repo.commits.get(target)?;

    let mut removed = Vec::new();
    let mut found = false;
    for commit in repo.commits.history(&head) {
        let commit = commit?;
        if commit.id() == target {
            found = true;
            break;
        }
        removed.push(commit.id().clone());
    }
    if !found {
        return Err(GraphError::InvalidRequest(format!(
            "commit {} isn't in the history of branch '{}'",
            target, branch
        )));
    }

    if removed.is_empty() {
        return Ok(HistoryRewind {
            branch: branch.clone(),
            target: target.clone(),
            removed,
            prune: HashSet::new(),
            commit_count: repo.branch(branch)?.commit_count,
        });
    }

    let elsewhere = repo.reachable_from_branches(Some(branch))?;
    let prune: HashSet<CommitId> = removed
        .iter()
        .filter(|id| !elsewhere.contains(*id))
        .cloned()
        .collect();
    reject_orphans(repo, "rewind history", &prune)?;

    let commit_count = repo.commits.count(target)?;
    Ok(HistoryRewind {
        branch: branch.clone(),
        target: target.clone(),
        removed,
        prune,
        commit_count,
    })
}

/// Rewind `branch` to `target`, returning the removed commit ids.
pub fn rewind_history(repo: &mut Repository, branch: &RefName, target: &CommitId) -> GraphResult<Vec<CommitId>> {
    let plan = plan_history_rewind(repo, branch, target)?;
    let removed = plan.removed.clone();
    plan.apply(repo);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::commits::tests::make_commit;
    use crate::graph::fixtures::{fork, name, tagger};
    use crate::graph::refs::RefManager;
    use chrono::Utc;

    fn no_tables(_: &Tree, _: &str) -> GraphResult<bool> {
        Ok(false)
    }

    #[test]
    fn test_delete_forked_branch_prunes_nothing() {
        let (mut repo, ids) = fork();
        let pruned = RefManager::delete_branch(&mut repo, &name("dev")).unwrap();

        assert_eq!(pruned, 0);
        assert!(repo.branch(&name("dev")).is_err());
        assert_eq!(repo.commits().len(), 3);
        assert!(repo.commits().contains(&ids[0]));
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_delete_branch_orphaning_tag_is_rejected() {
        let (mut repo, _) = fork();
        RefManager::set_default_branch(&mut repo, &name("dev")).unwrap();
        let before = repo.clone();

        let err = RefManager::delete_branch(&mut repo, &name("main")).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("'v1'"));
        assert_eq!(repo, before);
    }

    #[test]
    fn test_delete_branch_prunes_exclusive_commits() {
        let (mut repo, ids) = fork();
        RefManager::delete_tag(&mut repo, &name("v1")).unwrap();
        RefManager::set_default_branch(&mut repo, &name("dev")).unwrap();

        let pruned = RefManager::delete_branch(&mut repo, &name("main")).unwrap();
        assert_eq!(pruned, 2);
        assert!(!repo.commits().contains(&ids[1]));
        assert!(!repo.commits().contains(&ids[2]));
        assert!(repo.commits().contains(&ids[0]));
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_delete_branch_names_every_orphan() {
        let (mut repo, ids) = fork();
        RefManager::create_tag(&mut repo, &name("v0.9"), &ids[1], "", tagger(), Utc::now()).unwrap();
        RefManager::create_release(&mut repo, &name("r1"), &ids[2], "", tagger(), Utc::now()).unwrap();
        RefManager::set_default_branch(&mut repo, &name("dev")).unwrap();

        match plan_branch_deletion(&repo, &name("main")).unwrap_err() {
            GraphError::OrphanedReferences { tags, releases } => {
                assert_eq!(tags, vec!["v0.9".to_string(), "v1".to_string()]);
                assert_eq!(releases, vec!["r1".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rewind_orphaning_tag_is_rejected() {
        let (mut repo, ids) = fork();
        let before = repo.clone();

        let err = plan_commit_rewind(&repo, &name("main"), &ids[2], &AssumeTablesPresent).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("'v1'"));
        assert_eq!(repo, before);

        // the same rejection through the full operation
        assert!(delete_commit(&mut repo, &name("main"), &ids[2], &AssumeTablesPresent).is_err());
        assert_eq!(repo, before);
    }

    #[test]
    fn test_rewind_allowed_when_other_branch_shares_head() {
        let (mut repo, ids) = fork();
        RefManager::create_branch(&mut repo, &name("mirror"), &ids[2], "").unwrap();

        let plan = plan_commit_rewind(&repo, &name("main"), &ids[2], &AssumeTablesPresent).unwrap();
        assert!(!plan.prune);
        plan.apply(&mut repo);

        let main = repo.branch(&name("main")).unwrap();
        assert_eq!(main.head, ids[1]);
        assert_eq!(main.commit_count, 2);
        assert!(repo.commits().contains(&ids[2]));
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_rewind_prunes_unshared_commit() {
        let (mut repo, ids) = fork();
        RefManager::delete_tag(&mut repo, &name("v1")).unwrap();

        let plan = plan_commit_rewind(&repo, &name("main"), &ids[2], &AssumeTablesPresent).unwrap();
        assert!(plan.prune);
        plan.apply(&mut repo);
        assert!(!repo.commits().contains(&ids[2]));
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_rewind_rejects_non_head_and_root() {
        let (repo, ids) = fork();

        let err = plan_commit_rewind(&repo, &name("main"), &ids[1], &AssumeTablesPresent).unwrap_err();
        assert!(err.is_conflict());

        let err = plan_commit_rewind(&repo, &name("dev"), &ids[0], &AssumeTablesPresent).unwrap_err();
        assert!(err.is_conflict());

        let unknown = CommitId::from_hex(&"ee".repeat(32)).unwrap();
        let err = plan_commit_rewind(&repo, &name("main"), &unknown, &AssumeTablesPresent).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rewind_clears_missing_default_table() {
        let (mut repo, ids) = fork();
        RefManager::delete_tag(&mut repo, &name("v1")).unwrap();
        repo.set_default_table(Some("albums".to_string()));

        let kept = plan_commit_rewind(&repo, &name("main"), &ids[2], &AssumeTablesPresent).unwrap();
        assert!(!kept.clear_default_table);

        let plan = plan_commit_rewind(&repo, &name("main"), &ids[2], &no_tables).unwrap();
        assert!(plan.clear_default_table);
        plan.apply(&mut repo);
        assert_eq!(repo.default_table(), None);
    }

    #[test]
    fn test_rewind_on_non_default_branch_keeps_default_table() {
        let (mut repo, ids) = fork();
        let c4 = make_commit(Some(&ids[0]), 40, "dev work");
        let c4_id = c4.id().clone();
        repo.commits.put(c4).unwrap();
        let dev = repo.branches.get_mut(&name("dev")).unwrap();
        dev.head = c4_id.clone();
        dev.commit_count = 2;
        repo.set_default_table(Some("albums".to_string()));

        let plan = plan_commit_rewind(&repo, &name("dev"), &c4_id, &no_tables).unwrap();
        assert!(!plan.clear_default_table);
        assert!(plan.prune);
    }

    #[test]
    fn test_history_rewind() {
        let (mut repo, ids) = fork();
        RefManager::delete_tag(&mut repo, &name("v1")).unwrap();

        let plan = plan_history_rewind(&repo, &name("main"), &ids[0]).unwrap();
        assert_eq!(plan.removed, vec![ids[2].clone(), ids[1].clone()]);
        assert_eq!(plan.commit_count, 1);
        plan.apply(&mut repo);

        assert_eq!(repo.branch(&name("main")).unwrap().head, ids[0]);
        assert_eq!(repo.commits().len(), 1);
        assert!(repo.verify().is_empty());
    }

    #[test]
    fn test_history_rewind_guards() {
        let (repo, ids) = fork();

        let err = plan_history_rewind(&repo, &name("main"), &ids[0]).unwrap_err();
        assert!(matches!(err, GraphError::OrphanedReferences { .. }));

        // c3 exists but was never on dev
        let err = plan_history_rewind(&repo, &name("dev"), &ids[2]).unwrap_err();
        assert!(err.is_validation());

        let noop = plan_history_rewind(&repo, &name("main"), &ids[2]).unwrap();
        assert!(noop.is_noop());
    }

    #[test]
    fn test_broken_history_aborts_planning() {
        let (mut repo, ids) = fork();
        RefManager::create_branch(&mut repo, &name("side"), &ids[1], "").unwrap();
        repo.commits.prune([&ids[0]]);
        let before = repo.clone();

        let err = plan_branch_deletion(&repo, &name("side")).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(repo, before);
    }
}
