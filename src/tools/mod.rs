//! Tool router — registers and dispatches MCP tool calls.
//!
//! The server exposes a single tool, `codemcp`, whose arguments carry an
//! action name and its parameters. The router owns the [`Dispatcher`] and
//! therefore the workspace session shared by every call.

pub mod workspace;

use anyhow::Result;
use tracing::debug;

use crate::dispatch::Dispatcher;
use crate::server::{ContentItem, ToolCallResult, ToolDefinition};

/// Tool router that dispatches MCP tool calls to implementations.
#[derive(Debug, Default)]
pub struct ToolRouter {
    dispatcher: Dispatcher,
}

impl ToolRouter {
    /// Create a router with an uninitialized workspace session.
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// List all available tools with their JSON Schema definitions.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        vec![workspace::tool_definition()]
    }

    /// Call a tool by name with the given JSON arguments.
    ///
    /// Action failures are reported inside the result (`isError`), never as
    /// `Err`; the `Result` covers serialization of the result itself.
    pub fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallResult> {
        debug!(tool = name, "dispatching tool call");

        match name {
            workspace::TOOL_NAME => workspace::execute(&self.dispatcher, arguments),
            _ => Ok(ToolCallResult {
                content: vec![ContentItem {
                    content_type: "text".to_owned(),
                    text: format!("Unknown tool: {name}"),
                }],
                structured_content: None,
                is_error: true,
            }),
        }
    }
}
