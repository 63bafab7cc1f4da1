//! Action dispatcher — routes `{action, parameters}` to the workspace session.
//!
//! State machine: `Uninitialized → Ready`, entered only through `initialize`.
//! Every other action needs a session and fails with
//! `SessionNotInitializedError` without one. Re-initializing swaps in a new
//! session; the old one stays valid for calls already holding it.
//!
//! Every call yields an [`Envelope`]: `{"ok": true, "data": …}` or
//! `{"ok": false, "error": {"kind": …, "message": …}}`. No error escapes as a
//! fault.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::session::{GateRegistry, WorkspaceSession};

/// Default `run_command` timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Largest `timeout_secs` a caller may request for `run_command`.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

const DEFAULT_MAX_RESULTS: usize = 1000;

/// Names of all actions, in schema order.
pub const ACTION_NAMES: &[&str] = &[
    "initialize",
    "read_file",
    "write_file",
    "list_files",
    "run_command",
    "run_test",
    "run_format",
    "git_commit",
];

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A raw incoming call.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            parameters,
        }
    }

    /// Build a request from tool-call arguments.
    ///
    /// Accepts `{"action": …, "parameters": {…}}` as well as the flat form
    /// with parameters next to `action`.
    pub fn from_arguments(arguments: serde_json::Value) -> WorkspaceResult<Self> {
        let serde_json::Value::Object(mut map) = arguments else {
            return Err(WorkspaceError::InvalidParameters {
                action: String::new(),
                reason: "arguments must be an object".to_owned(),
            });
        };

        let action = match map.remove("action") {
            Some(serde_json::Value::String(action)) => action,
            _ => {
                return Err(WorkspaceError::InvalidParameters {
                    action: String::new(),
                    reason: "missing string field `action`".to_owned(),
                });
            }
        };

        let parameters = match map.remove("parameters") {
            Some(parameters) => parameters,
            None => serde_json::Value::Object(map),
        };

        Ok(Self { action, parameters })
    }
}

#[derive(Debug, Deserialize)]
pub struct InitializeParams {
    pub workspace_path: String,
    #[serde(default)]
    pub auto_init_git: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReadFileParams {
    pub file_path: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileParams {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub subdir: Option<String>,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_pattern() -> String {
    "*".to_owned()
}

const fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Deserialize)]
pub struct RunCommandParams {
    pub command: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunTestParams {
    #[serde(default)]
    pub test_selector: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GitCommitParams {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub allow_empty: bool,
}

/// A validated action.
#[derive(Debug)]
pub enum Action {
    Initialize(InitializeParams),
    Session(SessionAction),
}

/// An action that runs against an open workspace session.
#[derive(Debug)]
pub enum SessionAction {
    ReadFile(ReadFileParams),
    WriteFile(WriteFileParams),
    ListFiles(ListFilesParams),
    RunCommand(RunCommandParams),
    RunTest(RunTestParams),
    RunFormat,
    GitCommit(GitCommitParams),
}

impl Action {
    /// Validate `request` into an action. Unknown names are rejected before
    /// parameters are looked at.
    pub fn parse(request: ActionRequest) -> WorkspaceResult<Self> {
        let ActionRequest { action, parameters } = request;
        let parameters = match parameters {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            other => other,
        };

        let parsed = match action.as_str() {
            "initialize" => Self::Initialize(params(&action, parameters)?),
            "read_file" => SessionAction::ReadFile(params(&action, parameters)?).into(),
            "write_file" => SessionAction::WriteFile(params(&action, parameters)?).into(),
            "list_files" => SessionAction::ListFiles(params(&action, parameters)?).into(),
            "run_command" => SessionAction::RunCommand(params(&action, parameters)?).into(),
            "run_test" => SessionAction::RunTest(params(&action, parameters)?).into(),
            "run_format" => SessionAction::RunFormat.into(),
            "git_commit" => SessionAction::GitCommit(params(&action, parameters)?).into(),
            _ => return Err(WorkspaceError::UnknownAction(action)),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::Session(action) => action.name(),
        }
    }

    fn validate(&self) -> WorkspaceResult<()> {
        match self {
            Self::Initialize(p) if p.workspace_path.trim().is_empty() => {
                Err(WorkspaceError::InvalidParameters {
                    action: self.name().to_owned(),
                    reason: "workspace_path must not be empty".to_owned(),
                })
            }
            Self::Initialize(_) => Ok(()),
            Self::Session(action) => action.validate(),
        }
    }
}

impl From<SessionAction> for Action {
    fn from(action: SessionAction) -> Self {
        Self::Session(action)
    }
}

impl SessionAction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReadFile(_) => "read_file",
            Self::WriteFile(_) => "write_file",
            Self::ListFiles(_) => "list_files",
            Self::RunCommand(_) => "run_command",
            Self::RunTest(_) => "run_test",
            Self::RunFormat => "run_format",
            Self::GitCommit(_) => "git_commit",
        }
    }

    fn validate(&self) -> WorkspaceResult<()> {
        let invalid = |reason: &str| {
            Err(WorkspaceError::InvalidParameters {
                action: self.name().to_owned(),
                reason: reason.to_owned(),
            })
        };
        match self {
            Self::ReadFile(ReadFileParams { file_path })
            | Self::WriteFile(WriteFileParams { file_path, .. })
                if file_path.trim().is_empty() =>
            {
                invalid("file_path must not be empty")
            }
            Self::ListFiles(p) if p.pattern.is_empty() => invalid("pattern must not be empty"),
            Self::ListFiles(p) if p.max_results == 0 => invalid("max_results must be positive"),
            Self::RunCommand(p) if p.command.trim().is_empty() => {
                invalid("command must not be empty")
            }
            Self::RunCommand(RunCommandParams {
                timeout_secs: Some(t),
                ..
            }) if *t == 0 || *t > MAX_COMMAND_TIMEOUT_SECS => {
                invalid("timeout_secs must be between 1 and 600")
            }
            Self::GitCommit(p) if p.message.trim().is_empty() => {
                Err(WorkspaceError::InvalidCommitMessage)
            }
            _ => Ok(()),
        }
    }
}

fn params<T: DeserializeOwned>(action: &str, parameters: serde_json::Value) -> WorkspaceResult<T> {
    serde_json::from_value(parameters).map_err(|e| WorkspaceError::InvalidParameters {
        action: action.to_owned(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Structured error in the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Uniform result of every action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn success(data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::error_body(ErrorBody {
                kind: "InternalError".to_owned(),
                message: format!("failed to serialize result: {e}"),
            }),
        }
    }

    pub fn failure(error: &WorkspaceError) -> Self {
        Self::error_body(ErrorBody {
            kind: error.kind().to_owned(),
            message: error.to_string(),
        })
    }

    const fn error_body(body: ErrorBody) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(body),
        }
    }

    /// Error kind, if this is a failure.
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns the (swappable) workspace session and executes actions against it.
#[derive(Debug, Default)]
pub struct Dispatcher {
    session: RwLock<Option<Arc<WorkspaceSession>>>,
    initializing: Mutex<()>,
    gates: GateRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current session, if initialized.
    pub fn session(&self) -> Option<Arc<WorkspaceSession>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Execute tool-call arguments (`{action, parameters}` or flat).
    pub fn execute_arguments(&self, arguments: serde_json::Value) -> Envelope {
        match ActionRequest::from_arguments(arguments) {
            Ok(request) => self.execute(request),
            Err(e) => Envelope::failure(&e),
        }
    }

    /// Execute one request and wrap the outcome in an envelope.
    pub fn execute(&self, request: ActionRequest) -> Envelope {
        let name = request.action.clone();
        debug!(action = %name, "dispatching action");

        match Action::parse(request).and_then(|action| self.run(action)) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(action = %name, kind = e.kind(), error = %e, "action failed");
                Envelope::failure(&e)
            }
        }
    }

    fn run(&self, action: Action) -> WorkspaceResult<Envelope> {
        match action {
            Action::Initialize(params) => self.initialize(&params),
            Action::Session(action) => {
                let session = self.session().ok_or(WorkspaceError::SessionNotInitialized)?;
                run_in_session(&session, action)
            }
        }
    }

    fn initialize(&self, params: &InitializeParams) -> WorkspaceResult<Envelope> {
        let _serialized = self
            .initializing
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let path = expand_home(&params.workspace_path);
        match WorkspaceSession::open(&path, params.auto_init_git, &self.gates) {
            Ok(session) => {
                let info = session.info();
                let previous = self.swap(Some(Arc::new(session)));
                if let Some(previous) = previous {
                    info!(
                        previous = %previous.root().display(),
                        workspace = %info.workspace,
                        "replaced workspace session"
                    );
                }
                Ok(Envelope::success(&info))
            }
            Err(e @ WorkspaceError::InvalidWorkspace { .. }) => {
                warn!(error = %e, "workspace cannot be opened, dropping session");
                self.swap(None);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn swap(&self, next: Option<Arc<WorkspaceSession>>) -> Option<Arc<WorkspaceSession>> {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, next)
    }
}

fn run_in_session(session: &WorkspaceSession, action: SessionAction) -> WorkspaceResult<Envelope> {
    let envelope = match action {
        SessionAction::ReadFile(p) => Envelope::success(&session.read_file(&p.file_path)?),
        SessionAction::WriteFile(p) => Envelope::success(&session.write_file(&p.file_path, &p.content)?),
        SessionAction::ListFiles(p) => Envelope::success(&session.list_files(
            p.subdir.as_deref().unwrap_or("."),
            &p.pattern,
            p.max_results,
        )?),
        SessionAction::RunCommand(p) => {
            let timeout =
                Duration::from_secs(p.timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS));
            Envelope::success(&session.run_command(&p.command, timeout)?)
        }
        SessionAction::RunTest(p) => Envelope::success(&session.run_test(p.test_selector.as_deref())?),
        SessionAction::RunFormat => Envelope::success(&session.run_format()?),
        SessionAction::GitCommit(p) => Envelope::success(&session.commit(&p.message, p.allow_empty)?),
    };
    Ok(envelope)
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_arguments_nested_and_flat() {
        let nested = ActionRequest::from_arguments(json!({
            "action": "read_file",
            "parameters": {"file_path": "a.txt"}
        }))
        .expect("nested");
        assert_eq!(nested.action, "read_file");
        assert_eq!(nested.parameters, json!({"file_path": "a.txt"}));

        let flat = ActionRequest::from_arguments(json!({
            "action": "read_file",
            "file_path": "a.txt"
        }))
        .expect("flat");
        assert_eq!(flat.parameters, json!({"file_path": "a.txt"}));
    }

    #[test]
    fn test_from_arguments_requires_action() {
        let err = ActionRequest::from_arguments(json!({"file_path": "a"})).expect_err("no action");
        assert_eq!(err.kind(), "InvalidParametersError");
    }

    #[test]
    fn test_unknown_action_is_typed() {
        let err = Action::parse(ActionRequest::new("delete_everything", json!({})))
            .expect_err("unknown");
        assert_eq!(err.kind(), "UnknownActionError");
    }

    #[test]
    fn test_parameter_validation() {
        let cases = [
            ("read_file", json!({}), "InvalidParametersError"),
            ("write_file", json!({"file_path": "a"}), "InvalidParametersError"),
            ("run_command", json!({"command": "  "}), "InvalidParametersError"),
            ("run_command", json!({"command": "ls", "timeout_secs": 0}), "InvalidParametersError"),
            ("run_command", json!({"command": "ls", "timeout_secs": 9999}), "InvalidParametersError"),
            ("initialize", json!({"workspace_path": ""}), "InvalidParametersError"),
            ("git_commit", json!({}), "InvalidCommitMessageError"),
            ("git_commit", json!({"message": "  \n"}), "InvalidCommitMessageError"),
        ];
        for (action, parameters, kind) in cases {
            let err = Action::parse(ActionRequest::new(action, parameters.clone()))
                .expect_err(action);
            assert_eq!(err.kind(), kind, "{action} {parameters}");
        }
    }

    #[test]
    fn test_defaults() {
        let Action::Session(SessionAction::ListFiles(p)) = Action::parse(ActionRequest::new("list_files", json!(null)))
            .expect("list_files")
        else {
            panic!("wrong action");
        };
        assert_eq!(p.pattern, "*");
        assert!(p.subdir.is_none());
        assert_eq!(p.max_results, DEFAULT_MAX_RESULTS);

        assert!(matches!(
            Action::parse(ActionRequest::new("run_format", json!({}))).expect("run_format"),
            Action::Session(SessionAction::RunFormat)
        ));
    }

    #[test]
    fn test_every_action_name_parses_or_validates() {
        for name in ACTION_NAMES {
            let result = Action::parse(ActionRequest::new(*name, json!({})));
            if let Err(e) = result {
                assert_ne!(e.kind(), "UnknownActionError", "{name}");
            }
        }
    }

    #[test]
    fn test_envelope_shape() {
        let ok = serde_json::to_value(Envelope::success(&json!({"x": 1}))).expect("ser");
        assert_eq!(ok, json!({"ok": true, "data": {"x": 1}}));

        let err = serde_json::to_value(Envelope::failure(&WorkspaceError::NothingToCommit))
            .expect("ser");
        assert_eq!(err["ok"], json!(false));
        assert_eq!(err["error"]["kind"], json!("NothingToCommitError"));
        assert!(err.get("data").is_none());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        assert_eq!(expand_home("rel"), PathBuf::from("rel"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~"), home);
            assert_eq!(expand_home("~/proj"), home.join("proj"));
        }
    }
}
