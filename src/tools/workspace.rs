//! `codemcp` tool — pair-programming workspace actions.

use anyhow::{Context, Result};

use crate::dispatch::{ACTION_NAMES, DEFAULT_COMMAND_TIMEOUT_SECS, Dispatcher, MAX_COMMAND_TIMEOUT_SECS};
use crate::server::{ContentItem, ToolCallResult, ToolDefinition};

pub const TOOL_NAME: &str = "codemcp";

pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.to_owned(),
        description: "Pair-programming workspace. Call `initialize` with a workspace_path first; \
            then read, write and list files inside it, run shell commands or the test/format \
            commands configured in codemcp.toml, and commit changes with git_commit. \
            Returns a JSON envelope {ok, data|error}."
            .to_owned(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ACTION_NAMES,
                    "description": "Action to perform"
                },
                "parameters": {
                    "type": "object",
                    "description": "Action parameters (may also be given next to `action`)",
                    "properties": {
                        "workspace_path": {
                            "type": "string",
                            "description": "initialize: workspace directory (`~` is expanded)"
                        },
                        "auto_init_git": {
                            "type": "boolean",
                            "description": "initialize: run `git init` if not a repository",
                            "default": false
                        },
                        "file_path": {
                            "type": "string",
                            "description": "read_file/write_file: path relative to the workspace root"
                        },
                        "content": {
                            "type": "string",
                            "description": "write_file: full new file content"
                        },
                        "subdir": {
                            "type": "string",
                            "description": "list_files: directory to search (default: workspace root)"
                        },
                        "pattern": {
                            "type": "string",
                            "description": "list_files: glob pattern, `*` stays in one directory, `**` recurses",
                            "default": "*"
                        },
                        "max_results": {
                            "type": "integer",
                            "description": "list_files: maximum number of results (default: 1000)",
                            "default": 1000
                        },
                        "command": {
                            "type": "string",
                            "description": "run_command: shell command line"
                        },
                        "timeout_secs": {
                            "type": "integer",
                            "description": format!(
                                "run_command: timeout in seconds (default: {DEFAULT_COMMAND_TIMEOUT_SECS}, max: {MAX_COMMAND_TIMEOUT_SECS})"
                            ),
                            "default": DEFAULT_COMMAND_TIMEOUT_SECS,
                            "minimum": 1,
                            "maximum": MAX_COMMAND_TIMEOUT_SECS
                        },
                        "test_selector": {
                            "type": "string",
                            "description": "run_test: selector substituted into the configured test command"
                        },
                        "message": {
                            "type": "string",
                            "description": "git_commit: commit message"
                        },
                        "allow_empty": {
                            "type": "boolean",
                            "description": "git_commit: create a commit even if nothing changed",
                            "default": false
                        }
                    }
                }
            },
            "required": ["action"]
        }),
    }
}

/// Execute the `codemcp` tool.
pub fn execute(dispatcher: &Dispatcher, arguments: serde_json::Value) -> Result<ToolCallResult> {
    let envelope = dispatcher.execute_arguments(arguments);
    let structured =
        serde_json::to_value(&envelope).context("failed to serialize result envelope")?;
    let text = serde_json::to_string_pretty(&structured)
        .context("failed to render result envelope")?;

    Ok(ToolCallResult {
        content: vec![ContentItem {
            content_type: "text".to_owned(),
            text,
        }],
        structured_content: Some(structured),
        is_error: !envelope.ok,
    })
}
