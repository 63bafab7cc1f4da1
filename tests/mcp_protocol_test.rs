//! MCP protocol integration tests.
//!
//! Drives the JSON-RPC server loop over in-memory pipes and checks the
//! protocol types and the `codemcp` tool surface.

use serde_json::json;

use codemcp::server::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, serve};
use codemcp::tools::ToolRouter;

/// Feed `requests` (one JSON value per line) through the server loop.
fn run_session(router: &ToolRouter, requests: &[serde_json::Value]) -> Vec<serde_json::Value> {
    let input: String = requests.iter().map(|r| format!("{r}\n")).collect();
    let mut reader = std::io::Cursor::new(input.into_bytes());
    let mut output = Vec::new();
    serve(router, &mut reader, &mut output).expect("serve");

    String::from_utf8(output)
        .expect("utf8 output")
        .lines()
        .map(|l| serde_json::from_str(l).expect("response is JSON"))
        .collect()
}

#[test]
fn test_json_rpc_request_parsing() {
    let req: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": "codemcp", "arguments": {"action": "initialize"}}
    }))
    .expect("should parse request");

    assert_eq!(req.method, "tools/call");
    assert_eq!(req.id, Some(json!(1)));
}

#[test]
fn test_json_rpc_error_response() {
    let resp = JsonRpcResponse {
        jsonrpc: "2.0".to_owned(),
        id: Some(json!(2)),
        result: None,
        error: Some(JsonRpcError {
            code: -32601,
            message: "method not found".to_owned(),
            data: None,
        }),
    };

    let json_str = serde_json::to_string(&resp).expect("should serialize");
    assert!(json_str.contains("-32601"));
    assert!(!json_str.contains("result"));
}

#[test]
fn test_tool_definitions_complete() {
    let router = ToolRouter::new();
    let tools = router.list_tools();
    assert_eq!(tools.len(), 1);

    let tool = &tools[0];
    assert_eq!(tool.name, "codemcp");
    assert!(!tool.description.is_empty());
    let actions = tool.input_schema["properties"]["action"]["enum"]
        .as_array()
        .expect("action enum");
    let names: Vec<&str> = actions.iter().filter_map(|a| a.as_str()).collect();
    for expected in [
        "initialize",
        "read_file",
        "write_file",
        "list_files",
        "run_command",
        "run_test",
        "run_format",
        "git_commit",
    ] {
        assert!(names.contains(&expected), "missing action {expected}");
    }
}

#[test]
fn test_handshake_and_tools_list() {
    let router = ToolRouter::new();
    let responses = run_session(
        &router,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}),
        ],
    );

    // The notification gets no response.
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["result"]["protocolVersion"], json!("2025-06-18"));
    assert_eq!(responses[0]["result"]["serverInfo"]["name"], json!("codemcp"));
    assert_eq!(responses[1]["result"]["tools"][0]["name"], json!("codemcp"));
    assert_eq!(responses[2]["id"], json!(3));
}

#[test]
fn test_protocol_errors() {
    let router = ToolRouter::new();
    let mut reader = std::io::Cursor::new(
        b"not json\n{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"ping\"}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"nope\"}\n"
            .to_vec(),
    );
    let mut output = Vec::new();
    serve(&router, &mut reader, &mut output).expect("serve");
    let responses: Vec<serde_json::Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json"))
        .collect();

    assert_eq!(responses[0]["error"]["code"], json!(-32700));
    assert_eq!(responses[1]["error"]["code"], json!(-32600));
    assert_eq!(responses[2]["error"]["code"], json!(-32601));
}

#[test]
fn test_tool_call_unknown_tool() {
    let router = ToolRouter::new();
    let result = router
        .call_tool("bash", json!({}))
        .expect("should not error");
    assert!(result.is_error);
    assert!(result.content[0].text.contains("Unknown tool"));
}

#[test]
fn test_tool_call_before_initialize() {
    let router = ToolRouter::new();
    let result = router
        .call_tool("codemcp", json!({"action": "read_file", "file_path": "a.txt"}))
        .expect("should not error");

    assert!(result.is_error);
    let envelope = result.structured_content.expect("structured content");
    assert_eq!(envelope["ok"], json!(false));
    assert_eq!(envelope["error"]["kind"], json!("SessionNotInitializedError"));
}

#[test]
fn test_tool_call_write_read_over_stdio() {
    let dir = tempfile::tempdir().expect("tempdir");
    let router = ToolRouter::new();

    let call = |id: i64, arguments: serde_json::Value| {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": "codemcp", "arguments": arguments}
        })
    };

    let responses = run_session(
        &router,
        &[
            call(1, json!({
                "action": "initialize",
                "parameters": {"workspace_path": dir.path().to_str().expect("path")}
            })),
            call(2, json!({
                "action": "write_file",
                "parameters": {"file_path": "src/hello.py", "content": "print('hi')\n"}
            })),
            call(3, json!({"action": "read_file", "file_path": "src/hello.py"})),
            call(4, json!({"action": "read_file", "file_path": "../escape.txt"})),
        ],
    );

    assert_eq!(responses.len(), 4);
    for resp in &responses[..3] {
        assert_eq!(resp["result"]["structuredContent"]["ok"], json!(true), "{resp}");
        assert!(resp["result"].get("isError").is_none());
    }
    assert_eq!(
        responses[2]["result"]["structuredContent"]["data"]["content"],
        json!("print('hi')\n")
    );
    assert_eq!(responses[3]["result"]["isError"], json!(true));
    assert_eq!(
        responses[3]["result"]["structuredContent"]["error"]["kind"],
        json!("PathEscapeError")
    );

    // The text content carries the same envelope.
    let text = responses[2]["result"]["content"][0]["text"]
        .as_str()
        .expect("text");
    let parsed: serde_json::Value = serde_json::from_str(text).expect("envelope json");
    assert_eq!(parsed["ok"], json!(true));
}

#[test]
fn test_invalid_tools_call_params() {
    let router = ToolRouter::new();
    let responses = run_session(
        &router,
        &[json!({"jsonrpc": "2.0", "id": 9, "method": "tools/call", "params": {"arguments": {}}})],
    );
    assert_eq!(responses[0]["error"]["code"], json!(-32602));
}
