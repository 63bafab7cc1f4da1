//! Workspace session — the state shared across independently dispatched calls.
//!
//! A session is immutable once opened: re-initialization builds a new one.
//! Serialization is per canonical root through a [`WorkspaceGate`] taken from
//! a [`GateRegistry`], so two sessions on the same root share one lock.
//!
//! Mutating actions (write, commands, commit) hold the gate exclusively for
//! their whole duration, subprocess included. Reads and listings share it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::error::{WorkspaceError, WorkspaceResult};
use crate::files::{self, FileContent, FileListing, WriteOutcome};
use crate::runner::{CommandResult, CommandRunner, Invocation};
use crate::vcs::{CommitRecord, GitAdapter};

/// Per-root reader/writer lock. The guarded value carries no data, so a
/// poisoned lock is simply recovered.
#[derive(Debug, Default)]
pub struct WorkspaceGate(RwLock<()>);

impl WorkspaceGate {
    fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out one gate per canonical workspace root.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: Mutex<HashMap<PathBuf, Arc<WorkspaceGate>>>,
}

impl GateRegistry {
    pub fn gate_for(&self, root: &Path) -> Arc<WorkspaceGate> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(root.to_path_buf()).or_default())
    }
}

/// Summary returned by `initialize`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub workspace: String,
    pub repository: bool,
    pub project_prompt: Option<String>,
    pub commands: Vec<&'static str>,
}

/// Command output plus the rendered command line.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// An opened workspace.
#[derive(Debug)]
pub struct WorkspaceSession {
    root: PathBuf,
    config: ProjectConfig,
    repository: bool,
    runner: CommandRunner,
    git: Option<GitAdapter>,
    gate: Arc<WorkspaceGate>,
}

impl WorkspaceSession {
    /// Open `workspace_path`, loading its config and probing for a repository.
    ///
    /// With `auto_init_git`, a missing repository is created. Failing to
    /// canonicalize the root is fatal for the session.
    pub fn open(
        workspace_path: &Path,
        auto_init_git: bool,
        gates: &GateRegistry,
    ) -> WorkspaceResult<Self> {
        let invalid = |reason: String| WorkspaceError::InvalidWorkspace {
            path: workspace_path.display().to_string(),
            reason,
        };

        let root = workspace_path
            .canonicalize()
            .map_err(|e| invalid(e.to_string()))?;
        if !root.is_dir() {
            return Err(invalid("not a directory".to_owned()));
        }

        let config = ProjectConfig::load(&root);
        let runner = CommandRunner::new(&config.env_passthrough);
        let gate = gates.gate_for(&root);

        let (git, repository) = {
            let _exclusive = gate.exclusive();
            probe_repository(&root, &runner, auto_init_git)?
        };

        info!(
            workspace = %root.display(),
            repository,
            commands = ?config.configured_commands(),
            "workspace initialized"
        );

        Ok(Self {
            root,
            config,
            repository,
            runner,
            git,
            gate,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            workspace: self.root.display().to_string(),
            repository: self.repository,
            project_prompt: self.config.project_prompt.clone(),
            commands: self.config.configured_commands(),
        }
    }

    pub fn read_file(&self, file_path: &str) -> WorkspaceResult<FileContent> {
        let _shared = self.gate.shared();
        files::read_file(&self.root, file_path)
    }

    pub fn list_files(
        &self,
        subdir: &str,
        pattern: &str,
        max_results: usize,
    ) -> WorkspaceResult<FileListing> {
        let _shared = self.gate.shared();
        files::list_files(&self.root, subdir, pattern, max_results)
    }

    pub fn write_file(&self, file_path: &str, content: &str) -> WorkspaceResult<WriteOutcome> {
        let _exclusive = self.gate.exclusive();
        files::write_file(&self.root, file_path, content)
    }

    pub fn run_command(&self, command: &str, timeout: Duration) -> WorkspaceResult<CommandOutcome> {
        self.run(Invocation::Shell(command.to_owned()), timeout)
    }

    pub fn run_test(&self, selector: Option<&str>) -> WorkspaceResult<CommandOutcome> {
        let argv = self.config.render_test_command(selector)?;
        self.run(Invocation::Argv(argv), self.config.command_timeout())
    }

    pub fn run_format(&self) -> WorkspaceResult<CommandOutcome> {
        let argv = self.config.render_format_command()?;
        self.run(Invocation::Argv(argv), self.config.command_timeout())
    }

    pub fn commit(&self, message: &str, allow_empty: bool) -> WorkspaceResult<CommitRecord> {
        if message.trim().is_empty() {
            return Err(WorkspaceError::InvalidCommitMessage);
        }
        let _exclusive = self.gate.exclusive();
        let git = self.git.as_ref().ok_or_else(|| WorkspaceError::NoRepository {
            root: self.root.clone(),
        })?;
        // The repository may have been created (or removed) since initialize.
        git.ensure_repo(&self.root, false)?;
        git.commit(&self.root, message, allow_empty)
    }

    fn run(&self, invocation: Invocation, timeout: Duration) -> WorkspaceResult<CommandOutcome> {
        let _exclusive = self.gate.exclusive();
        let result = self.runner.run(&invocation, &self.root, timeout)?;
        Ok(CommandOutcome {
            command: invocation.display(),
            result,
        })
    }
}

/// Locate git and make sure `root` is (or becomes) a repository.
fn probe_repository(
    root: &Path,
    runner: &CommandRunner,
    auto_init_git: bool,
) -> WorkspaceResult<(Option<GitAdapter>, bool)> {
    let git = match GitAdapter::locate(runner.clone()) {
        Ok(git) => git,
        Err(e) if auto_init_git => return Err(e),
        Err(e) => {
            warn!(error = %e, "git unavailable, commits disabled");
            return Ok((None, false));
        }
    };

    match git.ensure_repo(root, auto_init_git) {
        Ok(()) => Ok((Some(git), true)),
        Err(WorkspaceError::NoRepository { .. }) => Ok((Some(git), false)),
        Err(e) => Err(e),
    }
}
