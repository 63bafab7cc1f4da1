//! Project configuration — `codemcp.toml` at the workspace root.
//!
//! ```toml
//! project_prompt = "Run the tests before committing."
//! timeout_secs = 300
//! env_passthrough = ["CARGO_HOME"]
//!
//! [commands]
//! format = ["cargo", "fmt"]
//! test = ["cargo", "test", "{selector}"]
//! ```
//!
//! Loading never fails: a missing or malformed file yields the default
//! config and a log line, and commands then fail closed when invoked.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{WorkspaceError, WorkspaceResult};

/// File name looked up at the workspace root.
pub const CONFIG_FILE_NAME: &str = "codemcp.toml";

/// Placeholder in the test template replaced by the selector.
pub const SELECTOR_PLACEHOLDER: &str = "{selector}";

/// Timeout for `run_test` / `run_format` when the config sets none.
pub const DEFAULT_CONFIGURED_TIMEOUT_SECS: u64 = 300;

/// Kinds of configured commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Format,
    Test,
}

impl CommandKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Test => "test",
        }
    }
}

/// A configured command: a non-empty argv skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate(Vec<String>);

impl CommandTemplate {
    /// Build a template, returning `None` if it has no tokens.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        let argv: Vec<String> = argv.into_iter().filter(|t| !t.trim().is_empty()).collect();
        if argv.is_empty() { None } else { Some(Self(argv)) }
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

/// Either an argv list or a single string split on whitespace.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Argv(Vec<String>),
    Line(String),
}

impl RawCommand {
    fn into_argv(self) -> Vec<String> {
        match self {
            Self::Argv(argv) => argv,
            Self::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCommands {
    format: Option<RawCommand>,
    test: Option<RawCommand>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    project_prompt: Option<String>,
    timeout_secs: Option<u64>,
    env_passthrough: Vec<String>,
    commands: RawCommands,
}

/// Immutable per-workspace configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectConfig {
    pub project_prompt: Option<String>,
    pub format: Option<CommandTemplate>,
    pub test: Option<CommandTemplate>,
    pub timeout_secs: Option<u64>,
    pub env_passthrough: Vec<String>,
}

impl ProjectConfig {
    /// Load `codemcp.toml` from `root`. Never fails.
    pub fn load(root: &Path) -> Self {
        let path = root.join(CONFIG_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no project config, using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read project config, using defaults");
                return Self::default();
            }
        };

        match Self::parse(&content) {
            Ok(config) => {
                debug!(path = %path.display(), commands = ?config.configured_commands(), "loaded project config");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed project config, using defaults");
                Self::default()
            }
        }
    }

    /// Parse config text. Empty command templates are dropped.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(content)?;
        let template = |kind: CommandKind, raw: Option<RawCommand>| {
            let command = raw.and_then(|r| CommandTemplate::new(r.into_argv()));
            if command.is_none() {
                debug!(kind = kind.as_str(), "command not configured");
            }
            command
        };

        Ok(Self {
            project_prompt: raw.project_prompt.filter(|p| !p.trim().is_empty()),
            format: template(CommandKind::Format, raw.commands.format),
            test: template(CommandKind::Test, raw.commands.test),
            timeout_secs: raw.timeout_secs.filter(|t| *t > 0),
            env_passthrough: raw.env_passthrough,
        })
    }

    /// Names of the configured command kinds.
    pub fn configured_commands(&self) -> Vec<&'static str> {
        [(CommandKind::Format, &self.format), (CommandKind::Test, &self.test)]
            .into_iter()
            .filter(|(_, t)| t.is_some())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Timeout for configured commands.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_CONFIGURED_TIMEOUT_SECS))
    }

    /// Render the test command for `selector`.
    ///
    /// Selector words replace each `{selector}` token, or are appended when
    /// the template has no placeholder. Without a selector the placeholder is
    /// removed.
    pub fn render_test_command(&self, selector: Option<&str>) -> WorkspaceResult<Vec<String>> {
        let template = self.test.as_ref().ok_or_else(|| not_configured(CommandKind::Test))?;
        let words: Vec<String> = selector
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        let has_placeholder = template.argv().iter().any(|t| t == SELECTOR_PLACEHOLDER);
        let mut argv = Vec::with_capacity(template.argv().len() + words.len());
        for token in template.argv() {
            if token == SELECTOR_PLACEHOLDER {
                argv.extend(words.iter().cloned());
            } else {
                argv.push(token.clone());
            }
        }
        if !has_placeholder {
            argv.extend(words);
        }
        Ok(argv)
    }

    /// Render the format command.
    pub fn render_format_command(&self) -> WorkspaceResult<Vec<String>> {
        self.format
            .as_ref()
            .map(|t| t.argv().to_vec())
            .ok_or_else(|| not_configured(CommandKind::Format))
    }
}

fn not_configured(kind: CommandKind) -> WorkspaceError {
    WorkspaceError::CommandNotConfigured {
        kind: kind.as_str().to_owned(),
    }
}
