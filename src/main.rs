//! DBHub - command-line front end
//!
//! Operates on a file-backed store under the configured data directory:
//! repository snapshots in `<data_dir>/refs`, uploaded files in
//! `<data_dir>/blobs`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use dbhub::config::EngineConfig;
use dbhub::graph::{CommitId, RefName, RepositoryId, Signature, UploadRequest};
use dbhub::logging;
use dbhub::store::{FileBlobStore, JsonFileReferenceStore, RepositoryManager};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "dbhub", version, about = "Version control for hosted SQLite databases")]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding repositories and uploaded files
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Name recorded on commits, tags and releases
    #[arg(long, global = true, env = "DBHUB_AUTHOR_NAME", default_value = "dbhub")]
    author_name: String,

    /// Email recorded on commits, tags and releases; required by commands that write them
    #[arg(long, global = true, env = "DBHUB_AUTHOR_EMAIL")]
    author_email: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a database file, creating the repository if needed
    Upload {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        file: PathBuf,
        #[arg(long, value_parser = parse_ref)]
        branch: Option<RefName>,
        #[arg(short, long)]
        message: Option<String>,
        /// Commit to build on; an older commit rewinds the branch first
        #[arg(long, value_parser = parse_commit)]
        parent: Option<CommitId>,
        /// Create `--branch` from `--parent` if it doesn't exist
        #[arg(long)]
        create_branch: bool,
        /// SHA-256 of the licence text
        #[arg(long)]
        licence: Option<String>,
    },
    /// List stored repositories
    List,
    /// Copy a repository to another owner
    Fork {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        owner: String,
    },
    /// Show the history of a branch
    Log {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        branch: Option<RefName>,
    },
    Branches {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
    },
    Tags {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
    },
    Releases {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
    },
    /// Check the repository's invariants
    Verify {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
    },
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    Release {
        #[command(subcommand)]
        action: ReleaseAction,
    },
    /// Remove the head commit of a branch
    DeleteCommit {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        branch: RefName,
        #[arg(value_parser = parse_commit)]
        commit: CommitId,
    },
    /// Move a branch back to an older commit in its history
    Rewind {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        branch: RefName,
        #[arg(value_parser = parse_commit)]
        commit: CommitId,
    },
    /// Fast-forward a branch over another, possibly in another repository
    Merge {
        #[arg(value_parser = parse_repo)]
        src: RepositoryId,
        #[arg(value_parser = parse_ref)]
        src_branch: RefName,
        #[arg(value_parser = parse_repo)]
        dest: RepositoryId,
        #[arg(value_parser = parse_ref)]
        dest_branch: RefName,
    },
    /// Set branch licences, e.g. `main=<sha256>`; an empty value clears it
    Licence {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(required = true, value_parser = parse_assignment)]
        assignments: Vec<(RefName, String)>,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    Create {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
        #[arg(value_parser = parse_commit)]
        commit: CommitId,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Rename {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        old: RefName,
        #[arg(value_parser = parse_ref)]
        new: RefName,
    },
    Delete {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
    },
    /// Make a branch the repository's default
    Default {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
    },
}

#[derive(Subcommand)]
enum TagAction {
    Create {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
        #[arg(value_parser = parse_commit)]
        commit: CommitId,
        #[arg(short, long, default_value = "")]
        message: String,
    },
    Rename {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        old: RefName,
        #[arg(value_parser = parse_ref)]
        new: RefName,
        #[arg(short, long)]
        message: Option<String>,
    },
    Delete {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
    },
}

#[derive(Subcommand)]
enum ReleaseAction {
    Create {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
        #[arg(value_parser = parse_commit)]
        commit: CommitId,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Rename {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        old: RefName,
        #[arg(value_parser = parse_ref)]
        new: RefName,
        #[arg(short, long)]
        description: Option<String>,
    },
    Delete {
        #[arg(value_parser = parse_repo)]
        repo: RepositoryId,
        #[arg(value_parser = parse_ref)]
        name: RefName,
    },
}

fn parse_repo(s: &str) -> Result<RepositoryId, String> {
    let (owner, database) = s
        .split_once('/')
        .ok_or_else(|| format!("expected <owner>/<database>, got '{}'", s))?;
    RepositoryId::new(owner, database).map_err(|e| e.to_string())
}

fn parse_ref(s: &str) -> Result<RefName, String> {
    RefName::new(s).map_err(|e| e.to_string())
}

fn parse_commit(s: &str) -> Result<CommitId, String> {
    CommitId::from_hex(s).map_err(|e| e.to_string())
}

fn parse_assignment(s: &str) -> Result<(RefName, String), String> {
    let (branch, sha) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <branch>=<licence sha256>, got '{}'", s))?;
    Ok((parse_ref(branch)?, sha.to_string()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = if cli.verbose { "dbhub=debug" } else { config.log_filter.as_str() };
    logging::init(filter);

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> CliResult<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config = config.data_dir(dir);
    }
    Ok(config)
}

/// the signature for commands that record an author
fn actor(name: &str, email: Option<&str>) -> CliResult<Signature> {
    match email {
        Some(email) if !email.trim().is_empty() && !name.trim().is_empty() => Ok(Signature::new(name, email)),
        _ => Err("this command records an author: pass --author-email or set DBHUB_AUTHOR_EMAIL".into()),
    }
}

fn open_manager(config: EngineConfig) -> CliResult<RepositoryManager> {
    let refs = JsonFileReferenceStore::open(config.data_dir.join("refs"))?;
    let blobs = FileBlobStore::open(config.data_dir.join("blobs"))?;
    let manager = RepositoryManager::builder(Arc::new(refs))
        .blobs(Arc::new(blobs))
        .config(config)
        .build()?;
    Ok(manager)
}

fn run(cli: Cli, config: EngineConfig) -> CliResult<()> {
    let author_name = cli.author_name;
    let author_email = cli.author_email;
    let author = || actor(&author_name, author_email.as_deref());
    let manager = open_manager(config)?;

    match cli.command {
        Command::Upload {
            repo,
            file,
            branch,
            message,
            parent,
            create_branch,
            licence,
        } => {
            let bytes = std::fs::read(&file)?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| repo.database.clone());
            let mut req = UploadRequest::new(file_name, "", 0, author()?).create_branch(create_branch);
            if let Some(branch) = branch {
                req = req.branch(branch);
            }
            if let Some(message) = message {
                req = req.message(message);
            }
            if let Some(parent) = parent {
                req = req.parent(parent);
            }
            if let Some(licence) = licence {
                req = req.licence(licence);
            }
            let outcome = manager.upload(&repo, &bytes, req)?;
            for removed in &outcome.rewound {
                println!("removed {}", removed.short());
            }
            println!(
                "[{} {}] {} commit(s)",
                outcome.branch,
                outcome.commit.short(),
                outcome.commit_count
            );
        }
        Command::List => {
            for id in manager.list()? {
                println!("{}", id);
            }
        }
        Command::Fork { repo, owner } => {
            let fork = manager.fork(&repo, &owner)?;
            println!("forked {} to {}", repo, fork);
        }
        Command::Log { repo, branch } => {
            let snapshot = manager.load(&repo)?;
            let branch = branch.unwrap_or_else(|| snapshot.default_branch().clone());
            for commit in snapshot.branch_history(&branch)? {
                println!("commit {}", commit.id());
                println!("Author: {}", commit.author());
                println!("Date:   {}", commit.timestamp().to_rfc3339());
                println!();
                if !commit.message().is_empty() {
                    println!("    {}", commit.summary());
                    println!();
                }
            }
        }
        Command::Branches { repo } => {
            let snapshot = manager.load(&repo)?;
            for (name, branch) in snapshot.branches() {
                let marker = if name == snapshot.default_branch() { "*" } else { " " };
                println!(
                    "{} {} {} ({} commits) {}",
                    marker,
                    name,
                    branch.head.short(),
                    branch.commit_count,
                    branch.description
                );
            }
        }
        Command::Tags { repo } => {
            for (name, tag) in manager.load(&repo)?.tags() {
                println!("{} {} {}", name, tag.commit.short(), tag.message);
            }
        }
        Command::Releases { repo } => {
            for (name, release) in manager.load(&repo)?.releases() {
                println!(
                    "{} {} {} bytes {}",
                    name,
                    release.commit.short(),
                    release.size_bytes,
                    release.description
                );
            }
        }
        Command::Verify { repo } => {
            let issues = manager.verify(&repo)?;
            if !issues.is_empty() {
                for issue in &issues {
                    println!("{}", issue);
                }
                return Err(format!("{} integrity issue(s) found", issues.len()).into());
            }
            println!("ok");
        }
        Command::Branch { action } => match action {
            BranchAction::Create {
                repo,
                name,
                commit,
                description,
            } => manager.create_branch(&repo, &name, &commit, &description)?,
            BranchAction::Rename { repo, old, new } => manager.rename_branch(&repo, &old, &new)?,
            BranchAction::Delete { repo, name } => {
                let pruned = manager.delete_branch(&repo, &name)?;
                println!("deleted branch {} ({} commit(s) pruned)", name, pruned);
            }
            BranchAction::Default { repo, name } => manager.set_default_branch(&repo, &name)?,
        },
        Command::Tag { action } => match action {
            TagAction::Create {
                repo,
                name,
                commit,
                message,
            } => manager.create_tag(&repo, &name, &commit, &message, author()?)?,
            TagAction::Rename {
                repo,
                old,
                new,
                message,
            } => manager.rename_tag(&repo, &old, &new, message.as_deref())?,
            TagAction::Delete { repo, name } => {
                manager.delete_tag(&repo, &name)?;
            }
        },
        Command::Release { action } => match action {
            ReleaseAction::Create {
                repo,
                name,
                commit,
                description,
            } => manager.create_release(&repo, &name, &commit, &description, author()?)?,
            ReleaseAction::Rename {
                repo,
                old,
                new,
                description,
            } => manager.rename_release(&repo, &old, &new, description.as_deref())?,
            ReleaseAction::Delete { repo, name } => {
                manager.delete_release(&repo, &name)?;
            }
        },
        Command::DeleteCommit { repo, branch, commit } => {
            let head = manager.delete_commit(&repo, &branch, &commit)?;
            println!("{} is now at {}", branch, head.short());
        }
        Command::Rewind { repo, branch, commit } => {
            let removed = manager.rewind_history(&repo, &branch, &commit)?;
            for id in &removed {
                println!("removed {}", id.short());
            }
        }
        Command::Merge {
            src,
            src_branch,
            dest,
            dest_branch,
        } => {
            let outcome = manager.merge(&src, &src_branch, &dest, &dest_branch, &author()?)?;
            for mismatch in &outcome.licence_mismatches {
                println!(
                    "warning: commit {} carries licence {} but {} uses {}",
                    mismatch.commit.short(),
                    mismatch.incoming,
                    dest_branch,
                    mismatch.destination
                );
            }
            println!(
                "{} fast-forwarded to {} ({} commit(s))",
                dest_branch,
                outcome.new_head.short(),
                outcome.commits_added
            );
        }
        Command::Licence { repo, assignments } => {
            let assignments: BTreeMap<RefName, String> = assignments.into_iter().collect();
            for change in manager.set_licences(&repo, &assignments, &author()?)? {
                println!(
                    "{}: {} -> {}",
                    change.branch,
                    change.old_head.short(),
                    change.new_head.short()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_requires_email() {
        let err = actor("Alice", None).unwrap_err();
        assert!(err.to_string().contains("--author-email"));
        assert!(actor("Alice", Some("  ")).is_err());

        let signature = actor("Alice", Some("alice@example.org")).unwrap();
        assert_eq!(signature, Signature::new("Alice", "alice@example.org"));
    }

    #[test]
    fn test_parse_author_flags() {
        let cli = Cli::try_parse_from([
            "dbhub",
            "--author-name",
            "Alice",
            "--author-email",
            "alice@example.org",
            "tags",
            "alice/chinook.sqlite",
        ])
        .unwrap();
        assert_eq!(cli.author_name, "Alice");
        assert_eq!(cli.author_email.as_deref(), Some("alice@example.org"));
        assert!(matches!(cli.command, Command::Tags { ref repo } if repo.owner == "alice"));
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(Cli::try_parse_from(["dbhub", "tags", "no-slash"]).is_err());
        assert!(Cli::try_parse_from(["dbhub", "licence", "alice/db.sqlite", "main"]).is_err());
        assert!(Cli::try_parse_from(["dbhub", "rewind", "alice/db.sqlite", "main", "xyz"]).is_err());
    }
}
