//! Version control adapter — drives the `git` CLI.
//!
//! All git invocations go through [`CommandRunner`] in argv mode with the
//! git binary resolved once from `PATH`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::runner::{CommandResult, CommandRunner, Invocation};

/// Upper bound for a single git invocation.
const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Identity used when the repository has no `user.email` configured.
const FALLBACK_AUTHOR_NAME: &str = "codemcp";
const FALLBACK_AUTHOR_EMAIL: &str = "codemcp@localhost";

/// A created commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRecord {
    /// Full revision hash of the new commit.
    pub revision: String,
    /// First line of the commit message.
    pub summary: String,
}

/// Git adapter bound to one binary and runner.
#[derive(Debug, Clone)]
pub struct GitAdapter {
    git: PathBuf,
    runner: CommandRunner,
}

impl GitAdapter {
    /// Locate `git` on `PATH`.
    pub fn locate(runner: CommandRunner) -> WorkspaceResult<Self> {
        let git = which::which("git").map_err(|e| WorkspaceError::CommandExecution {
            command: "git".to_owned(),
            reason: format!("git not found on PATH: {e}"),
        })?;
        Ok(Self { git, runner })
    }

    /// Whether `root` is the top level of a git work tree.
    ///
    /// A workspace nested inside some enclosing repository does not count:
    /// committing there would pick up changes staged outside the root.
    pub fn is_repository(&self, root: &Path) -> WorkspaceResult<bool> {
        let result = self.git(root, &["rev-parse", "--show-toplevel"])?;
        if result.exit_code != 0 {
            return Ok(false);
        }
        let toplevel = Path::new(result.stdout.trim());
        let same = match (toplevel.canonicalize(), root.canonicalize()) {
            (Ok(toplevel), Ok(root)) => toplevel == root,
            _ => false,
        };
        if !same {
            debug!(
                root = %root.display(),
                toplevel = %toplevel.display(),
                "workspace is not a repository root"
            );
        }
        Ok(same)
    }

    /// Make sure `root` is a repository, running `git init` when `auto_init`.
    pub fn ensure_repo(&self, root: &Path, auto_init: bool) -> WorkspaceResult<()> {
        if self.is_repository(root)? {
            return Ok(());
        }
        if !auto_init {
            return Err(WorkspaceError::NoRepository {
                root: root.to_path_buf(),
            });
        }
        self.git_checked(root, "init", &["init"])?;
        info!(root = %root.display(), "initialized git repository");
        Ok(())
    }

    /// Stage every change under `root` and commit it with `message`.
    ///
    /// Refuses to create an empty commit unless `allow_empty` is set.
    pub fn commit(
        &self,
        root: &Path,
        message: &str,
        allow_empty: bool,
    ) -> WorkspaceResult<CommitRecord> {
        let message = message.trim_end();
        if message.trim().is_empty() {
            return Err(WorkspaceError::InvalidCommitMessage);
        }

        self.git_checked(root, "add", &["add", "-A", "--", "."])?;

        let status = self.git_checked(root, "status", &["status", "--porcelain", "--", "."])?;
        if status.stdout.trim().is_empty() && !allow_empty {
            debug!(root = %root.display(), "nothing to commit");
            return Err(WorkspaceError::NothingToCommit);
        }

        let name_override = format!("user.name={FALLBACK_AUTHOR_NAME}");
        let email_override = format!("user.email={FALLBACK_AUTHOR_EMAIL}");
        let mut args: Vec<&str> = Vec::new();
        if !self.has_identity(root)? {
            args.extend(["-c", name_override.as_str(), "-c", email_override.as_str()]);
        }
        args.extend(["commit", "--quiet", "-m", message]);
        if allow_empty {
            args.push("--allow-empty");
        }
        self.git_checked(root, "commit", &args)?;

        let head = self.git_checked(root, "rev-parse", &["rev-parse", "HEAD"])?;
        let record = CommitRecord {
            revision: head.stdout.trim().to_owned(),
            summary: message.lines().next().unwrap_or_default().to_owned(),
        };
        info!(root = %root.display(), revision = %record.revision, "created commit");
        Ok(record)
    }

    fn has_identity(&self, root: &Path) -> WorkspaceResult<bool> {
        let result = self.git(root, &["config", "--get", "user.email"])?;
        Ok(result.exit_code == 0 && !result.stdout.trim().is_empty())
    }

    fn git(&self, root: &Path, args: &[&str]) -> WorkspaceResult<CommandResult> {
        let argv = std::iter::once(self.git.to_string_lossy().into_owned())
            .chain(args.iter().map(|a| (*a).to_owned()))
            .collect();
        self.runner.run(&Invocation::Argv(argv), root, GIT_TIMEOUT)
    }

    fn git_checked(
        &self,
        root: &Path,
        operation: &str,
        args: &[&str],
    ) -> WorkspaceResult<CommandResult> {
        let result = self.git(root, args)?;
        if result.exit_code != 0 || result.timed_out {
            let stderr = if result.timed_out {
                format!("timed out after {}s", GIT_TIMEOUT.as_secs())
            } else {
                result.stderr.trim().to_owned()
            };
            return Err(WorkspaceError::VersionControl {
                operation: operation.to_owned(),
                stderr,
            });
        }
        Ok(result)
    }
}
