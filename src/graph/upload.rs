//! Commits created by uploading a new version of a database file.

use chrono::{DateTime, Utc};

use crate::graph::commit::{Commit, CommitBuilder, CommitMessage};
use crate::graph::error::{GraphError, GraphResult, ObjectKind};
use crate::graph::licence::{display_name, LicenceRegistry};
use crate::graph::reachability::{self, HistoryRewind};
use crate::graph::refs::Branch;
use crate::graph::repository::Repository;
use crate::graph::tree::{Tree, TreeEntry};
use crate::graph::types::{validate_sha256_hex, CommitId, RefName, RepositoryId, Signature};

/// A database file that has already been written to the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// target branch, the default branch when unset
    pub branch: Option<RefName>,
    pub file_name: String,
    pub content_sha256: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    /// inherited from the parent commit when unset
    pub licence_sha256: Option<String>,
    pub message: Option<String>,
    /// explicit parent; an older commit of the branch rewinds the branch to it
    pub parent: Option<CommitId>,
    /// allow the upload to start a new branch at `parent`
    pub create_branch: bool,
    pub author: Signature,
    /// defaults to the author
    pub committer: Option<Signature>,
    /// defaults to the current time
    pub timestamp: Option<DateTime<Utc>>,
}

impl UploadRequest {
    pub fn new(
        file_name: impl Into<String>,
        content_sha256: impl Into<String>,
        size_bytes: u64,
        author: Signature,
    ) -> Self {
        Self {
            branch: None,
            file_name: file_name.into(),
            content_sha256: content_sha256.into(),
            size_bytes,
            last_modified: Utc::now(),
            licence_sha256: None,
            message: None,
            parent: None,
            create_branch: false,
            author,
            committer: None,
            timestamp: None,
        }
    }

    pub fn branch(mut self, branch: RefName) -> Self {
        self.branch = Some(branch);
        self
    }

    pub fn licence(mut self, licence_sha256: impl Into<String>) -> Self {
        self.licence_sha256 = Some(licence_sha256.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn create_branch(mut self, create: bool) -> Self {
        self.create_branch = create;
        self
    }

    pub fn last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn validate(&self) -> GraphResult<()> {
        validate_sha256_hex(&self.content_sha256)?;
        if let Some(licence) = self.licence_sha256.as_deref() {
            if !licence.is_empty() {
                validate_sha256_hex(licence)?;
            }
        }
        if self.file_name.is_empty() {
            return Err(GraphError::InvalidRequest("uploaded file needs a name".to_string()));
        }
        Ok(())
    }

    /// caller-supplied message, ignoring blank ones
    fn explicit_message(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.trim().is_empty())
    }

    fn build_commit(&self, parent: Option<CommitId>, licence: &str, message: String) -> GraphResult<Commit> {
        let tree = Tree::new(vec![TreeEntry::database(
            self.file_name.clone(),
            self.content_sha256.to_ascii_lowercase(),
            self.size_bytes,
            self.last_modified,
            licence,
        )]);
        let mut builder = CommitBuilder::new()
            .tree(tree)
            .parent_opt(parent)
            .author(self.author.clone())
            .message(message);
        if let Some(committer) = &self.committer {
            builder = builder.committer(committer.clone());
        }
        if let Some(timestamp) = self.timestamp {
            builder = builder.timestamp(timestamp);
        }
        builder.build()
    }
}

/// What an upload did to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub branch: RefName,
    pub commit: CommitId,
    pub commit_count: usize,
    pub created_branch: bool,
    /// commits dropped from the branch because the upload named an older parent
    pub rewound: Vec<CommitId>,
}

impl Repository {
    /// Create a repository from the first upload of a database.
    pub fn from_upload(
        id: RepositoryId,
        default_branch: RefName,
        req: &UploadRequest,
        registry: &dyn LicenceRegistry,
    ) -> GraphResult<Self> {
        req.validate()?;
        if req.parent.is_some() {
            return Err(GraphError::InvalidRequest(
                "the first upload of a database can't have a parent commit".to_string(),
            ));
        }

        let branch = req.branch.clone().unwrap_or(default_branch);
        let licence = req.licence_sha256.clone().unwrap_or_default().to_ascii_lowercase();
        let message = match req.explicit_message() {
            Some(m) => m.to_string(),
            None if licence.is_empty() => CommitMessage::initial_upload(None),
            None => CommitMessage::initial_upload(Some(&display_name(registry, &licence))),
        };

        let root = req.build_commit(None, &licence, message)?;
        let repo = Repository::create(id, branch, root)?;
        tracing::info!(repository = %repo.id, branch = %repo.default_branch, "database created");
        Ok(repo)
    }
}

/// Add an uploaded database file as a new commit.
///
/// The parent is the explicit `parent` when given, otherwise the branch head.
/// A parent older than the head rewinds the branch first, under the same
/// rules as any other history rewind.
pub fn commit_upload(
    repo: &mut Repository,
    req: &UploadRequest,
    registry: &dyn LicenceRegistry,
) -> GraphResult<UploadOutcome> {
    req.validate()?;
    let branch = req.branch.clone().unwrap_or_else(|| repo.default_branch.clone());

    let mut rewind: Option<HistoryRewind> = None;
    let parent = match repo.branches.get(&branch) {
        Some(existing) => match &req.parent {
            Some(parent) if parent != &existing.head => {
                rewind = Some(reachability::plan_history_rewind(repo, &branch, parent)?);
                parent.clone()
            }
            Some(parent) => parent.clone(),
            None => existing.head.clone(),
        },
        None => {
            if !req.create_branch {
                return Err(GraphError::not_found(ObjectKind::Branch, &branch));
            }
            repo.ensure_name_free(&branch)?;
            req.parent.clone().ok_or_else(|| {
                GraphError::InvalidRequest(format!(
                    "a parent commit is required to create branch '{}'",
                    branch
                ))
            })?
        }
    };

    let parent_commit = repo.commits.get(&parent)?;
    let old_licence = parent_commit.licence().to_string();
    let licence = req
        .licence_sha256
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| old_licence.clone());
    let message = match req.explicit_message() {
        Some(m) => m.to_string(),
        None if licence != old_licence => CommitMessage::upload_licence_changed(
            &display_name(registry, &old_licence),
            &display_name(registry, &licence),
        ),
        None => String::new(),
    };

    let commit = req.build_commit(Some(parent.clone()), &licence, message)?;
    if let Some(existing) = repo.commits.find(commit.id()) {
        if existing != &commit {
            return Err(GraphError::CommitCollision(commit.id().clone()));
        }
    }
    let commit_count = repo.commits.count(&parent)? + 1;
    let commit_id = commit.id().clone();

    let rewound = match rewind {
        Some(plan) => {
            let removed = plan.removed.clone();
            plan.apply(repo);
            removed
        }
        None => Vec::new(),
    };
    repo.commits.put(commit)?;

    let created_branch = !repo.branches.contains_key(&branch);
    let entry = repo
        .branches
        .entry(branch.clone())
        .or_insert_with(|| Branch::new(commit_id.clone(), commit_count, ""));
    entry.head = commit_id.clone();
    entry.commit_count = commit_count;

    tracing::info!(
        repository = %repo.id,
        branch = %branch,
        commit = %commit_id,
        commit_count,
        created_branch,
        rewound = rewound.len(),
        "database upload committed"
    );
    Ok(UploadOutcome {
        branch,
        commit: commit_id,
        commit_count,
        created_branch,
        rewound,
    })
}
