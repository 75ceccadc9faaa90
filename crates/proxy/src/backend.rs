//! Backend instances and the wire data model.
//!
//! A [`Backend`] is the runtime form of one configured MCP server. It owns
//! exactly one transport for its lifetime (HTTP client or supervised
//! subprocess) plus the cached capability catalog, and dispatches tool calls
//! and resource accesses to that transport.

use crate::catalog;
use crate::config::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::http_backend::HttpTransport;
use crate::supervisor::{StdioTransport, SupervisorState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type JsonObject = Map<String, Value>;

// ============================================================================
// Wire Data Model
// ============================================================================

/// A tool exposed by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool input. Never null in responses.
    #[serde(default = "empty_object", rename = "inputSchema")]
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// A resource exposed by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(
        default,
        rename = "uriTemplate",
        skip_serializing_if = "Option::is_none"
    )]
    pub uri_template: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Error details for a failed tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Base64 image payload inside an image content block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub data: String,
}

/// One block of content in a [`CallToolResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        name: String,
        #[serde(default)]
        input: JsonObject,
    },
    ToolResult {
        #[serde(rename = "toolUseId")]
        tool_use_id: String,
        #[serde(default)]
        content: String,
        #[serde(default, rename = "isError")]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ToolError>,
    },
}

/// Result of a `tools/call` dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default, rename = "toolError", skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<ToolError>,
}

// ============================================================================
// Proxy Request / Response
// ============================================================================

/// A generic resource-style request to be forwarded to a backend.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequestInput {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// The backend's reply to a forwarded request.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// Wire shape of a forwarded request over the stdio transport.
#[derive(Serialize)]
struct StdioProxyRequest<'a> {
    method: &'a str,
    path: &'a str,
    query: &'a str,
    headers: &'a HashMap<String, Vec<String>>,
    body: String,
}

/// Wire shape of the stdio backend's reply to a forwarded request.
#[derive(Deserialize)]
struct StdioProxyResponse {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    body: String,
}

// ============================================================================
// Backend
// ============================================================================

/// Transport discriminant for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    Stdio,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Http => write!(f, "http"),
            BackendKind::Stdio => write!(f, "stdio"),
        }
    }
}

/// Snapshot of one backend for the `/status` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    /// Supervisor state (stdio backends only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SupervisorState>,
    /// Restart count (stdio backends only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restarts: Option<u32>,
    pub tool_count: usize,
    pub resource_count: usize,
}

#[derive(Debug, Default)]
struct Catalog {
    tools: Vec<ToolInfo>,
    restricted_tools: Vec<ToolInfo>,
    resources: Vec<ResourceInfo>,
    restricted_resources: Vec<ResourceInfo>,
}

enum Transport {
    Http(HttpTransport),
    Stdio(StdioTransport),
}

/// Runtime instance of a [`BackendConfig`].
pub struct Backend {
    config: BackendConfig,
    transport: Transport,
    catalog: RwLock<Catalog>,
}

impl Backend {
    /// Build a backend from its validated configuration.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let address = config.address.as_deref().filter(|a| !a.trim().is_empty());
        let command = config.command.as_deref().filter(|c| !c.trim().is_empty());
        let transport = match (address, command) {
            (Some(address), None) => Transport::Http(HttpTransport::new(
                config.name.clone(),
                address.to_string(),
            )?),
            (None, Some(command)) => Transport::Stdio(StdioTransport::new(
                config.name.clone(),
                command.to_string(),
                config.args.clone(),
                config.env.clone(),
            )),
            _ => {
                return Err(ProxyError::Config(format!(
                    "server '{}': either address or command is required",
                    config.name
                )));
            }
        };

        Ok(Self {
            config,
            transport,
            catalog: RwLock::new(Catalog::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> BackendKind {
        match self.transport {
            Transport::Http(_) => BackendKind::Http,
            Transport::Stdio(_) => BackendKind::Stdio,
        }
    }

    /// Start the backend. Spawns the subprocess for stdio backends; HTTP
    /// backends have nothing to start.
    pub async fn start(&self) -> Result<()> {
        match &self.transport {
            Transport::Http(_) => Ok(()),
            Transport::Stdio(t) => t.start().await,
        }
    }

    /// Shut the backend down. The supervision context is cancelled exactly
    /// once, here.
    pub async fn shutdown(&self) {
        match &self.transport {
            Transport::Http(_) => {}
            Transport::Stdio(t) => t.shutdown().await,
        }
    }

    pub fn status(&self) -> BackendStatus {
        let catalog = self.catalog.read();
        let (state, restarts) = match &self.transport {
            Transport::Http(_) => (None, None),
            Transport::Stdio(t) => (Some(t.state()), Some(t.restart_count())),
        };
        BackendStatus {
            name: self.config.name.clone(),
            kind: self.kind(),
            state,
            restarts,
            tool_count: catalog.tools.len(),
            resource_count: catalog.resources.len(),
        }
    }

    // ------------------------------------------------------------------
    // Allow-lists
    // ------------------------------------------------------------------

    /// An empty allow-list allows every tool.
    pub fn is_tool_allowed(&self, tool_name: &str) -> bool {
        self.config.allowed_tools.is_empty()
            || self.config.allowed_tools.iter().any(|t| t == tool_name)
    }

    /// An empty allow-list allows every resource.
    pub fn is_resource_allowed(&self, resource_name: &str) -> bool {
        self.config.allowed_resources.is_empty()
            || self
                .config
                .allowed_resources
                .iter()
                .any(|r| r == resource_name)
    }

    // ------------------------------------------------------------------
    // Catalog snapshots
    // ------------------------------------------------------------------

    pub fn tools(&self) -> Vec<ToolInfo> {
        self.catalog.read().tools.clone()
    }

    pub fn restricted_tools(&self) -> Vec<ToolInfo> {
        self.catalog.read().restricted_tools.clone()
    }

    pub fn resources(&self) -> Vec<ResourceInfo> {
        self.catalog.read().resources.clone()
    }

    pub fn restricted_resources(&self) -> Vec<ResourceInfo> {
        self.catalog.read().restricted_resources.clone()
    }

    // ------------------------------------------------------------------
    // Catalog refresh
    // ------------------------------------------------------------------

    /// Re-fetch the tool and resource catalogs and partition them by the
    /// allow-lists.
    ///
    /// A failure to fetch one list does not abort the other; whatever was
    /// fetched replaces the prior contents atomically, the rest is retained,
    /// and the last failure is returned.
    pub async fn refresh_catalog(&self) -> Result<()> {
        let (tools_result, resources_result) = match &self.transport {
            Transport::Http(t) => (t.fetch_tools().await, t.fetch_resources().await),
            Transport::Stdio(t) => {
                let shared = t.shared();
                let send = move |req: Vec<u8>| {
                    let shared = Arc::clone(&shared);
                    async move { shared.request(&req).await }
                };
                (
                    catalog::fetch_stdio_tools(&send).await,
                    catalog::fetch_stdio_resources(&send).await,
                )
            }
        };

        let mut failure: Option<ProxyError> = None;
        {
            let mut cached = self.catalog.write();
            match tools_result {
                Ok(raw) => {
                    let (allowed, restricted) =
                        catalog::partition(raw, &self.config.allowed_tools, |t| t.name.as_str());
                    cached.tools = allowed;
                    cached.restricted_tools = restricted;
                }
                Err(e) => {
                    failure = Some(ProxyError::BackendCommunication(format!(
                        "failed to fetch tools for server '{}': {e}",
                        self.config.name
                    )));
                }
            }
            match resources_result {
                Ok(raw) => {
                    let (allowed, restricted) =
                        catalog::partition(raw, &self.config.allowed_resources, |r| {
                            r.name.as_str()
                        });
                    cached.resources = allowed;
                    cached.restricted_resources = restricted;
                }
                Err(e) => {
                    failure = Some(ProxyError::BackendCommunication(format!(
                        "failed to fetch resources for server '{}': {e}",
                        self.config.name
                    )));
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Invoke a tool on this backend.
    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<CallToolResult> {
        match &self.transport {
            Transport::Http(t) => t.call_tool(name, &arguments).await,
            Transport::Stdio(t) => {
                // Minimal JSON-RPC-shaped frame, no envelope version or id;
                // this is what the stdio MCP backends expect for execution.
                let frame = serde_json::json!({
                    "method": name,
                    "params": arguments,
                });
                let request = serde_json::to_vec(&frame)
                    .map_err(|e| ProxyError::Internal(format!("encode tool call: {e}")))?;
                let response = t.shared().request(&request).await?;
                serde_json::from_slice(&response).map_err(|e| {
                    ProxyError::BackendCommunication(format!(
                        "failed to decode tool call response from '{}': {e}",
                        self.config.name
                    ))
                })
            }
        }
    }

    /// Forward a generic resource-style request to this backend.
    pub async fn proxy_request(&self, input: &ProxyRequestInput) -> Result<ProxyResponse> {
        match &self.transport {
            Transport::Http(t) => t.proxy_request(input).await,
            Transport::Stdio(t) => {
                let frame = StdioProxyRequest {
                    method: &input.method,
                    path: &input.path,
                    query: &input.query,
                    headers: &input.headers,
                    body: String::from_utf8_lossy(&input.body).into_owned(),
                };
                let request = serde_json::to_vec(&frame)
                    .map_err(|e| ProxyError::Internal(format!("encode proxy request: {e}")))?;
                let response = t.shared().request(&request).await?;
                let decoded: StdioProxyResponse =
                    serde_json::from_slice(&response).map_err(|e| {
                        ProxyError::BackendCommunication(format!(
                            "invalid response from server '{}': {e}",
                            self.config.name
                        ))
                    })?;
                Ok(ProxyResponse {
                    status: decoded.status,
                    headers: decoded.headers,
                    body: decoded.body.into_bytes(),
                })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn http_backend(name: &str, allowed_tools: &[&str], allowed_resources: &[&str]) -> Backend {
        Backend::new(BackendConfig {
            name: name.to_string(),
            address: Some("http://127.0.0.1:1".to_string()),
            allowed_tools: allowed_tools.iter().map(|s| s.to_string()).collect(),
            allowed_resources: allowed_resources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .expect("backend")
    }

    #[tokio::test]
    async fn empty_allow_list_allows_everything() {
        let backend = http_backend("a", &[], &[]);
        assert!(backend.is_tool_allowed("anything"));
        assert!(backend.is_resource_allowed("anything"));
    }

    #[tokio::test]
    async fn allow_list_restricts_by_name() {
        let backend = http_backend("a", &["t1"], &["r1"]);
        assert!(backend.is_tool_allowed("t1"));
        assert!(!backend.is_tool_allowed("t2"));
        assert!(backend.is_resource_allowed("r1"));
        assert!(!backend.is_resource_allowed("r2"));
    }

    #[test]
    fn text_block_round_trips() {
        let block = ContentBlock::Text {
            text: "ok".to_string(),
        };
        let encoded = serde_json::to_value(&block).unwrap();
        assert_eq!(encoded, json!({"type": "text", "text": "ok"}));
        let decoded: ContentBlock = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn image_block_round_trips() {
        let block = ContentBlock::Image {
            source: ImageSource {
                kind: "base64".to_string(),
                media_type: "image/png".to_string(),
                data: "aGk=".to_string(),
            },
        };
        let encoded = serde_json::to_value(&block).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "image",
                "source": {"type": "base64", "mediaType": "image/png", "data": "aGk="}
            })
        );
        let decoded: ContentBlock = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn tool_use_block_round_trips() {
        let mut input = JsonObject::new();
        input.insert("x".to_string(), json!(1));
        let block = ContentBlock::ToolUse {
            tool_use_id: "tu-1".to_string(),
            name: "calc".to_string(),
            input,
        };
        let encoded = serde_json::to_value(&block).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "tool_use", "toolUseId": "tu-1", "name": "calc", "input": {"x": 1}})
        );
        let decoded: ContentBlock = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn tool_result_block_round_trips() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu-1".to_string(),
            content: "done".to_string(),
            is_error: true,
            error: Some(ToolError {
                message: "boom".to_string(),
                code: Some("E1".to_string()),
                data: None,
            }),
        };
        let encoded = serde_json::to_value(&block).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "tool_result",
                "toolUseId": "tu-1",
                "content": "done",
                "isError": true,
                "error": {"message": "boom", "code": "E1"}
            })
        );
        let decoded: ContentBlock = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn call_tool_result_decodes_backend_shape() {
        let raw = r#"{
            "content": [{"type": "text", "text": "ok"}],
            "isError": false
        }"#;
        let result: CallToolResult = serde_json::from_str(raw).unwrap();
        assert!(!result.is_error);
        assert!(result.tool_error.is_none());
        assert_eq!(
            result.content,
            vec![ContentBlock::Text {
                text: "ok".to_string()
            }]
        );
    }

    #[test]
    fn tool_info_defaults_schema_to_empty_object() {
        let tool: ToolInfo = serde_json::from_str(r#"{"name": "t1"}"#).unwrap();
        assert_eq!(tool.input_schema, json!({}));
        let encoded = serde_json::to_value(&tool).unwrap();
        assert_eq!(encoded.get("inputSchema"), Some(&json!({})));
    }
}
