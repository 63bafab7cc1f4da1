//! MCP Server — stdio transport, JSON-RPC 2.0, newline-delimited.
//!
//! Implements the Model Context Protocol (2025-06-18) server side over
//! stdin/stdout. Protocol flow:
//! 1. Client sends `initialize` → server responds with capabilities
//! 2. Client sends `notifications/initialized`
//! 3. Client sends `tools/list` → server returns the `codemcp` tool
//! 4. Client sends `tools/call` → the dispatcher runs one workspace action
//! 5. Client closes stdin → server exits
//!
//! Requests are handled one at a time, so workspace actions arriving over
//! one connection never overlap. The session locks still apply when the
//! router is shared with other callers.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::tools::ToolRouter;

/// Maximum size of a single JSON-RPC line (10 MiB). Writes can carry whole files.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

const PROTOCOL_VERSION: &str = "2025-06-18";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// MCP protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: &'static str,
    capabilities: serde_json::Value,
    server_info: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

/// MCP tool definition for tools/list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// MCP tools/call params.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// MCP content item in tools/call response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// MCP tools/call result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

// ---------------------------------------------------------------------------
// MCP Server configuration
// ---------------------------------------------------------------------------

/// Configuration for the MCP server.
#[derive(Debug, Clone, Default)]
pub struct McpServerConfig {
    /// Workspace to open before serving, if any.
    pub workspace: Option<PathBuf>,
    /// Run `git init` in that workspace when it is not a repository.
    pub auto_init_git: bool,
}

// ---------------------------------------------------------------------------
// Server main loop
// ---------------------------------------------------------------------------

/// Run the MCP server on stdin/stdout until stdin closes.
pub fn run_mcp_server(config: McpServerConfig) -> Result<()> {
    info!(
        workspace = ?config.workspace,
        auto_init_git = config.auto_init_git,
        "codemcp MCP server starting"
    );

    let router = ToolRouter::new();
    if let Some(workspace) = &config.workspace {
        let envelope = router.dispatcher().execute_arguments(serde_json::json!({
            "action": "initialize",
            "workspace_path": workspace.display().to_string(),
            "auto_init_git": config.auto_init_git,
        }));
        if let Some(err) = envelope.error {
            anyhow::bail!("failed to open workspace {}: {}", workspace.display(), err.message);
        }
    }

    let stdin = std::io::stdin();
    let mut reader = std::io::BufReader::new(stdin.lock());
    let mut stdout = std::io::stdout().lock();
    serve(&router, &mut reader, &mut stdout)?;

    info!("codemcp MCP server stopped");
    Ok(())
}

/// Serve newline-delimited JSON-RPC from `reader`, writing responses to `writer`.
pub fn serve(router: &ToolRouter, reader: &mut impl BufRead, writer: &mut impl Write) -> Result<()> {
    let mut line_buf = String::new();

    loop {
        line_buf.clear();
        let bytes_read = match read_line_limited(reader, &mut line_buf, MAX_LINE_BYTES) {
            Ok(n) => n,
            Err(LineError::TooLong) => {
                warn!(max_bytes = MAX_LINE_BYTES, "request line too long, discarded");
                let resp = error_response(None, -32600, "invalid request: line too long");
                write_response(writer, &resp)?;
                continue;
            }
            Err(LineError::Io(e)) => return Err(e).context("failed to read request"),
        };

        // EOF — client closed the stream.
        if bytes_read == 0 {
            info!("input closed, shutting down");
            return Ok(());
        }

        let trimmed = line_buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!(raw = trimmed, "received request");

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid JSON-RPC request");
                let resp = error_response(None, -32700, &format!("parse error: {e}"));
                write_response(writer, &resp)?;
                continue;
            }
        };

        if request.jsonrpc != "2.0" {
            warn!(version = request.jsonrpc, "invalid JSON-RPC version");
            let resp = error_response(
                request.id.clone(),
                -32600,
                &format!("invalid request: jsonrpc must be \"2.0\", got \"{}\"", request.jsonrpc),
            );
            write_response(writer, &resp)?;
            continue;
        }

        let response = dispatch(router, &request);

        // Notifications never receive a response.
        if request.id.is_none() {
            debug!(method = request.method, "notification handled");
            continue;
        }

        if let Some(resp) = response {
            write_response(writer, &resp)?;
        }
    }
}

/// Dispatch a JSON-RPC request to the appropriate handler.
fn dispatch(router: &ToolRouter, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(router, req)),
        "notifications/initialized" => {
            info!("client initialized");
            None
        }
        "tools/list" => Some(success_response(
            req.id.clone(),
            &serde_json::json!({ "tools": router.list_tools() }),
        )),
        "tools/call" => Some(handle_tools_call(router, req)),
        "ping" => Some(success_response(req.id.clone(), &serde_json::json!({}))),
        _ => {
            warn!(method = req.method, "unknown method");
            Some(error_response(
                req.id.clone(),
                -32601,
                &format!("method not found: {}", req.method),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_initialize(router: &ToolRouter, req: &JsonRpcRequest) -> JsonRpcResponse {
    // A workspace opened at startup contributes its project prompt.
    let instructions = router
        .dispatcher()
        .session()
        .and_then(|s| s.config().project_prompt.clone());

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION,
        capabilities: serde_json::json!({ "tools": { "listChanged": false } }),
        server_info: serde_json::json!({
            "name": "codemcp",
            "version": env!("CARGO_PKG_VERSION"),
        }),
        instructions,
    };

    success_response(req.id.clone(), &result)
}

fn handle_tools_call(router: &ToolRouter, req: &JsonRpcRequest) -> JsonRpcResponse {
    let params: ToolCallParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                req.id.clone(),
                -32602,
                &format!("invalid tools/call params: {e}"),
            );
        }
    };

    match router.call_tool(&params.name, params.arguments) {
        Ok(result) => success_response(req.id.clone(), &result),
        Err(e) => {
            error!(tool = params.name, error = %e, "tool call failed");
            error_response(req.id.clone(), -32603, &format!("internal error: {e}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn success_response(id: Option<serde_json::Value>, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(v) => JsonRpcResponse {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(v),
            error: None,
        },
        Err(e) => {
            error!(error = %e, "failed to serialize success response");
            error_response(id, -32603, &format!("internal error: failed to serialize result: {e}"))
        }
    }
}

fn error_response(id: Option<serde_json::Value>, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_owned(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_owned(),
            data: None,
        }),
    }
}

/// Write a JSON-RPC response as a single line.
fn write_response(out: &mut impl Write, resp: &JsonRpcResponse) -> Result<()> {
    let json = serde_json::to_string(resp).context("failed to serialize response")?;
    debug!(response = json, "sending response");
    out.write_all(json.as_bytes())
        .and_then(|()| out.write_all(b"\n"))
        .and_then(|()| out.flush())
        .context("failed to write response")
}

enum LineError {
    TooLong,
    Io(std::io::Error),
}

/// Read one line into `buf`, up to `max_bytes`.
///
/// Returns the number of bytes read (0 = EOF). An oversized line is consumed
/// through its newline and reported as [`LineError::TooLong`], so the stream
/// stays in sync for the next request.
fn read_line_limited(
    reader: &mut impl BufRead,
    buf: &mut String,
    max_bytes: usize,
) -> Result<usize, LineError> {
    let mut raw = Vec::new();
    let mut overflow = false;
    loop {
        let available = reader.fill_buf().map_err(LineError::Io)?;
        if available.is_empty() {
            break;
        }
        let (consumed, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if !overflow && raw.len() + consumed > max_bytes {
            overflow = true;
            raw.clear();
        }
        if !overflow {
            raw.extend_from_slice(&available[..consumed]);
        }
        reader.consume(consumed);
        if found_newline {
            if overflow {
                return Err(LineError::TooLong);
            }
            break;
        }
    }
    if overflow {
        return Err(LineError::TooLong);
    }

    let line = String::from_utf8(raw).map_err(|e| {
        LineError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    buf.push_str(&line);
    Ok(line.len())
}
