//! Catalog fetching over stdio (with cursor pagination) and allow-list
//! partitioning.
//!
//! Stdio backends answer `tools/list` and `resources/list` as JSON-RPC 2.0
//! requests. A non-empty `nextCursor` in the result means there is another
//! page; pages are concatenated in order. A JSON-RPC error whose message is
//! exactly "Method not found" means the backend predates capability listing
//! and yields an empty catalog rather than a failure.

use crate::backend::{ResourceInfo, ToolInfo};
use crate::error::{ProxyError, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;

#[derive(Debug, Default, Deserialize)]
struct ListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
    #[serde(default)]
    resources: Vec<ResourceInfo>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    result: Option<ListResult>,
    #[serde(default)]
    error: Option<Value>,
}

fn is_method_not_found(error: &Value) -> bool {
    error
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| m == "Method not found")
}

/// Issue a paginated `*/list` call over a line transport, following
/// `nextCursor` until it comes back empty.
async fn fetch_pages<F, Fut>(send: &F, method: &str) -> Result<Vec<ListResult>>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    let mut pages = Vec::new();
    let mut cursor = String::new();

    loop {
        let mut params = Map::new();
        if !cursor.is_empty() {
            params.insert("cursor".to_string(), Value::String(cursor.clone()));
        }
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let request = serde_json::to_vec(&request)
            .map_err(|e| ProxyError::Internal(format!("encode {method} request: {e}")))?;

        let response = send(request).await?;
        let decoded: ListResponse = serde_json::from_slice(&response).map_err(|e| {
            ProxyError::BackendCommunication(format!("failed to decode {method} response: {e}"))
        })?;

        if let Some(error) = decoded.error {
            if is_method_not_found(&error) {
                return Ok(pages);
            }
            return Err(ProxyError::BackendCommunication(format!(
                "{method} returned an error: {error}"
            )));
        }

        let result = decoded.result.unwrap_or_default();
        let next = result.next_cursor.clone();
        pages.push(result);
        if next.is_empty() {
            break;
        }
        cursor = next;
    }

    Ok(pages)
}

/// Fetch the full tool catalog from a stdio backend.
pub async fn fetch_stdio_tools<F, Fut>(send: &F) -> Result<Vec<ToolInfo>>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    let pages = fetch_pages(send, "tools/list").await?;
    Ok(pages.into_iter().flat_map(|p| p.tools).collect())
}

/// Fetch the full resource catalog from a stdio backend.
pub async fn fetch_stdio_resources<F, Fut>(send: &F) -> Result<Vec<ResourceInfo>>
where
    F: Fn(Vec<u8>) -> Fut,
    Fut: Future<Output = Result<Vec<u8>>>,
{
    let pages = fetch_pages(send, "resources/list").await?;
    Ok(pages.into_iter().flat_map(|p| p.resources).collect())
}

/// Split a raw catalog into (allowed, restricted) by an allow-list.
///
/// An empty allow-list allows everything. Order is preserved on both sides,
/// and every input item lands in exactly one of the two outputs.
pub fn partition<T>(items: Vec<T>, allowed: &[String], name: fn(&T) -> &str) -> (Vec<T>, Vec<T>) {
    if allowed.is_empty() {
        return (items, Vec::new());
    }

    let mut kept = Vec::new();
    let mut restricted = Vec::new();
    for item in items {
        if allowed.iter().any(|a| a == name(&item)) {
            kept.push(item);
        } else {
            restricted.push(item);
        }
    }
    (kept, restricted)
}

// ============================================================================
// Tests
// ============================================================================
