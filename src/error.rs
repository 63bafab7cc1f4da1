//! Error types for the codemcp crate.
//!
//! Every failure an action can produce is a [`WorkspaceError`]. The
//! dispatcher converts it into the `{kind, message}` error object of the
//! result envelope, so [`WorkspaceError::kind`] names are part of the wire
//! contract and must stay stable.

use std::path::PathBuf;

/// Workspace handler error types.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// An action other than `initialize` arrived before any workspace was opened.
    #[error("workspace not initialized: call the `initialize` action first")]
    SessionNotInitialized,

    /// A path argument resolves outside the workspace root.
    #[error("path escapes workspace boundary: {path}")]
    PathEscape { path: String },

    /// File or directory not found at the specified path.
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// File is binary and cannot be returned as text.
    #[error("binary file cannot be read as text: {path}")]
    BinaryFile { path: PathBuf },

    /// No `format`/`test` command in `codemcp.toml`.
    #[error("no `{kind}` command configured in codemcp.toml")]
    CommandNotConfigured { kind: String },

    /// The workspace is not a git repository and auto-init was not requested.
    #[error("not a git repository: {root}")]
    NoRepository { root: PathBuf },

    /// The working tree has no changes relative to HEAD.
    #[error("nothing to commit: working tree clean")]
    NothingToCommit,

    /// Commit message is empty after trimming.
    #[error("commit message must not be empty")]
    InvalidCommitMessage,

    /// Process could not be spawned at all (distinct from a non-zero exit).
    #[error("failed to execute {command}: {reason}")]
    CommandExecution { command: String, reason: String },

    /// A git command that must succeed exited non-zero.
    #[error("git {operation} failed: {stderr}")]
    VersionControl { operation: String, stderr: String },

    /// The workspace path cannot be canonicalized or is not a directory.
    #[error("invalid workspace {path}: {reason}")]
    InvalidWorkspace { path: String, reason: String },

    /// Action name is not one of the known actions.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Action parameters are missing or have the wrong shape.
    #[error("invalid parameters for {action}: {reason}")]
    InvalidParameters { action: String, reason: String },

    /// I/O error with context.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    /// Stable error kind reported in the result envelope.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotInitialized => "SessionNotInitializedError",
            Self::PathEscape { .. } => "PathEscapeError",
            Self::FileNotFound { .. } => "FileNotFoundError",
            Self::BinaryFile { .. } => "BinaryFileError",
            Self::CommandNotConfigured { .. } => "CommandNotConfiguredError",
            Self::NoRepository { .. } => "NoRepositoryError",
            Self::NothingToCommit => "NothingToCommitError",
            Self::InvalidCommitMessage => "InvalidCommitMessageError",
            Self::CommandExecution { .. } => "CommandExecutionError",
            Self::VersionControl { .. } => "VersionControlError",
            Self::InvalidWorkspace { .. } => "InvalidWorkspaceError",
            Self::UnknownAction(_) => "UnknownActionError",
            Self::InvalidParameters { .. } => "InvalidParametersError",
            Self::Io { .. } => "IoError",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience result type for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
