//! `codemcp` — MCP pair-programming workspace server.
//!
//! Exposes one Model Context Protocol tool, `codemcp`, over stdio (JSON-RPC
//! 2.0, newline-delimited). A caller opens a workspace with `initialize` and
//! then works inside it across independent calls.
//!
//! # Actions
//!
//! - `initialize` — open a workspace, load `codemcp.toml`, optionally `git init`
//! - `read_file` / `write_file` — guarded text I/O, atomic replacement
//! - `list_files` — glob listing (`*`, `?`, `**`)
//! - `run_command` — shell command with timeout and captured output
//! - `run_test` / `run_format` — configured argv templates
//! - `git_commit` — stage everything and commit, refusing empty commits
//!
//! # Architecture
//!
//! ```text
//! stdin (JSON-RPC) → server → ToolRouter → Dispatcher → WorkspaceSession
//!                                                          ├─ guard  (path confinement)
//!                                                          ├─ files  (read/write/list)
//!                                                          ├─ runner (subprocesses)
//!                                                          ├─ config (codemcp.toml)
//!                                                          └─ vcs    (git)
//! stdout (JSON-RPC) ← {ok, data|error} envelope ←──────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod guard;
pub mod runner;
pub mod server;
pub mod session;
pub mod tools;
pub mod util;
pub mod vcs;

pub use dispatch::{ActionRequest, Dispatcher, Envelope};
pub use error::{WorkspaceError, WorkspaceResult};
pub use server::run_mcp_server;
