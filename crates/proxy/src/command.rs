//! Command mode: JSON-RPC 2.0 over the proxy's own standard streams.
//!
//! One request per stdin line, one response per stdout line; all logging
//! goes to stderr. The fleet is shut down when stdin reaches EOF.

use crate::backend::{JsonObject, ProxyRequestInput};
use crate::error::ProxyError;
use crate::fleet::Fleet;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// JSON-RPC 2.0 error codes.
const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
const TOOL_CALL_FAILED: i64 = -32000;
const SERVER_NOT_FOUND: i64 = -32001;
const RESOURCE_NOT_ALLOWED: i64 = -32002;
const PROXY_FAILED: i64 = -32003;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: JsonObject,
}

#[derive(Debug, Deserialize)]
struct ResourceAccessParams {
    #[serde(default, rename = "serverName")]
    server_name: String,
    #[serde(default, rename = "resourceName")]
    resource_name: String,
    #[serde(default, rename = "proxyPath")]
    proxy_path: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
}

fn success(id: Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

fn failure(id: Value, code: i64, message: &str, data: Option<Value>) -> String {
    let mut error = json!({"code": code, "message": message});
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({"jsonrpc": "2.0", "id": id, "error": error}).to_string()
}

/// Process one JSON-RPC request line and produce the response line.
pub async fn handle_line(fleet: &Fleet, line: &str) -> String {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(_) => return failure(Value::Null, PARSE_ERROR, "Parse error: invalid JSON", None),
    };

    if request.jsonrpc != "2.0" {
        return failure(
            request.id,
            INVALID_REQUEST,
            "Invalid Request: jsonrpc must be '2.0'",
            None,
        );
    }

    match request.method.as_str() {
        "tools/list" => success(request.id, json!({"tools": fleet.list_tools()})),
        "restrictedTools/list" => {
            success(request.id, json!({"tools": fleet.list_restricted_tools()}))
        }
        "resources/list" => success(request.id, json!({"resources": fleet.list_resources()})),
        "restrictedResources/list" => success(
            request.id,
            json!({"resources": fleet.list_restricted_resources()}),
        ),
        "tools/call" => handle_tool_call(fleet, request.id, request.params).await,
        "resources/access" => handle_resource_access(fleet, request.id, request.params).await,
        _ => failure(request.id, METHOD_NOT_FOUND, "Method not found", None),
    }
}

async fn handle_tool_call(fleet: &Fleet, id: Value, params: Value) -> String {
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return failure(
                id,
                INVALID_PARAMS,
                "Invalid params for tools/call",
                Some(json!(e.to_string())),
            );
        }
    };
    if params.name.is_empty() {
        return failure(
            id,
            INVALID_PARAMS,
            "Invalid params for tools/call: name is required",
            None,
        );
    }

    match fleet.call_tool(&params.name, params.arguments).await {
        Ok(result) => match serde_json::to_value(&result) {
            Ok(result) => success(id, result),
            Err(e) => failure(
                id,
                INTERNAL_ERROR,
                "Internal error",
                Some(json!(e.to_string())),
            ),
        },
        Err(ProxyError::Internal(detail)) => {
            tracing::error!("internal error calling tool '{}': {detail}", params.name);
            failure(id, INTERNAL_ERROR, "Internal error", None)
        }
        Err(err) => failure(
            id,
            TOOL_CALL_FAILED,
            "Tool call failed",
            Some(json!(err.to_string())),
        ),
    }
}

async fn handle_resource_access(fleet: &Fleet, id: Value, params: Value) -> String {
    let params: ResourceAccessParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            return failure(
                id,
                INVALID_PARAMS,
                "Invalid params for resources/access",
                Some(json!(e.to_string())),
            );
        }
    };
    if params.server_name.is_empty() || params.resource_name.is_empty() || params.method.is_empty()
    {
        return failure(
            id,
            INVALID_PARAMS,
            "Invalid params for resources/access: serverName, resourceName, and method are required",
            None,
        );
    }

    let backend = match fleet.resolve_resource_backend(&params.server_name, &params.resource_name)
    {
        Ok(backend) => backend,
        Err(ProxyError::BackendNotFound(_)) => {
            return failure(
                id,
                SERVER_NOT_FOUND,
                &format!("Server '{}' not found", params.server_name),
                None,
            );
        }
        Err(_) => {
            return failure(
                id,
                RESOURCE_NOT_ALLOWED,
                &format!(
                    "Resource '{}' not allowed on server '{}'",
                    params.resource_name, params.server_name
                ),
                None,
            );
        }
    };

    let mut path = format!("/resource/{}", params.resource_name);
    if !params.proxy_path.is_empty() {
        if !params.proxy_path.starts_with('/') {
            path.push('/');
        }
        path.push_str(&params.proxy_path);
    }

    let body = match &params.body {
        Some(value) => serde_json::to_vec(value).unwrap_or_default(),
        None => Vec::new(),
    };

    let mut headers: HashMap<String, Vec<String>> = params
        .headers
        .into_iter()
        .map(|(name, value)| (name, vec![value]))
        .collect();
    let has_content_type = headers.keys().any(|k| k.eq_ignore_ascii_case("content-type"));
    if !body.is_empty() && !has_content_type {
        headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
    }

    let input = ProxyRequestInput {
        method: params.method,
        path,
        query: String::new(),
        headers,
        body,
    };

    match fleet.proxy_request(&backend, &input).await {
        Ok(output) => {
            let body_text = String::from_utf8_lossy(&output.body).into_owned();
            // Hand structured bodies back as JSON, everything else as a string.
            let body_value = serde_json::from_str::<Value>(&body_text)
                .unwrap_or(Value::String(body_text));
            success(
                id,
                json!({
                    "status": output.status,
                    "headers": output.headers,
                    "body": body_value,
                }),
            )
        }
        Err(err) => failure(
            id,
            PROXY_FAILED,
            "Failed to proxy resource access",
            Some(json!(err.to_string())),
        ),
    }
}

/// Read JSON-RPC requests from stdin until EOF, one per line.
pub async fn run(fleet: Arc<Fleet>) -> anyhow::Result<()> {
    tracing::info!("Starting MCP proxy in command mode");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&fleet, &line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, shutting down");
    fleet.shutdown().await;
    Ok(())
}
