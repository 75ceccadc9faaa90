//! HTTP transport for backends reached over the network.
//!
//! There is no supervision for HTTP backends; the address is resolved per
//! request and every call is bounded by the shared 30 s client timeout.

use crate::backend::{CallToolResult, JsonObject, ProxyRequestInput, ProxyResponse, ResourceInfo, ToolInfo};
use crate::error::{ProxyError, Result};
use crate::timeouts::HTTP_REQUEST_TIMEOUT;
use serde::Deserialize;
use std::collections::HashMap;

/// Headers that terminate at each hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Join two URL path segments with exactly one slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

#[derive(Deserialize)]
struct ToolsListing {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

#[derive(Deserialize)]
struct ResourcesListing {
    #[serde(default)]
    resources: Vec<ResourceInfo>,
}

/// HTTP client bound to one backend address.
pub struct HttpTransport {
    name: String,
    address: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(name: String, address: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name,
            address,
            client,
        })
    }

    /// `GET {address}/tools`. A single call returns the full array; there is
    /// no pagination over HTTP.
    pub async fn fetch_tools(&self) -> Result<Vec<ToolInfo>> {
        let url = format!("{}/tools", self.address);
        let response = self.client.get(&url).send().await.map_err(|e| {
            ProxyError::BackendCommunication(format!("failed to get tools: {e}"))
        })?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(ProxyError::BackendCommunication(format!(
                "tools endpoint returned status {}",
                response.status().as_u16()
            )));
        }
        let listing: ToolsListing = response.json().await.map_err(|e| {
            ProxyError::BackendCommunication(format!("failed to decode tools response: {e}"))
        })?;
        Ok(listing.tools)
    }

    /// `GET {address}/resources`.
    pub async fn fetch_resources(&self) -> Result<Vec<ResourceInfo>> {
        let url = format!("{}/resources", self.address);
        let response = self.client.get(&url).send().await.map_err(|e| {
            ProxyError::BackendCommunication(format!("failed to get resources: {e}"))
        })?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(ProxyError::BackendCommunication(format!(
                "resources endpoint returned status {}",
                response.status().as_u16()
            )));
        }
        let listing: ResourcesListing = response.json().await.map_err(|e| {
            ProxyError::BackendCommunication(format!("failed to decode resources response: {e}"))
        })?;
        Ok(listing.resources)
    }

    /// `POST {address}/tool/{name}` with the arguments as a JSON body.
    pub async fn call_tool(&self, name: &str, arguments: &JsonObject) -> Result<CallToolResult> {
        let url = format!("{}/tool/{name}", self.address);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(arguments)
            .send()
            .await
            .map_err(|e| {
                ProxyError::BackendCommunication(format!(
                    "failed to call tool '{name}' on server '{}': {e}",
                    self.name
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::BackendCommunication(format!(
                "server '{}' returned status {} for tool '{name}': {}",
                self.name,
                status.as_u16(),
                summarize(&body)
            )));
        }

        response.json().await.map_err(|e| {
            ProxyError::BackendCommunication(format!(
                "failed to decode tool call response from '{}': {e}",
                self.name
            ))
        })
    }

    /// Forward a generic request to `{address}{path}?{query}` with the
    /// client's headers and body, hop-by-hop headers stripped both ways.
    pub async fn proxy_request(&self, input: &ProxyRequestInput) -> Result<ProxyResponse> {
        let method = reqwest::Method::from_bytes(input.method.as_bytes())
            .map_err(|_| ProxyError::InvalidRequest(format!("invalid method '{}'", input.method)))?;

        let mut url = single_joining_slash(&self.address, &input.path);
        if !input.query.is_empty() {
            url.push('?');
            url.push_str(&input.query);
        }

        let mut request = self.client.request(method, &url);
        for (name, values) in &input.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request
            .body(input.body.clone())
            .send()
            .await
            .map_err(|e| {
                ProxyError::BackendCommunication(format!(
                    "failed to reach server '{}': {e}",
                    self.name
                ))
            })?;

        let status = response.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else { continue };
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| {
                ProxyError::BackendCommunication(format!(
                    "failed to read response from server '{}': {e}",
                    self.name
                ))
            })?
            .to_vec();

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// First line of a body, truncated, for error messages.
fn summarize(body: &str) -> String {
    let line = body.lines().next().unwrap_or_default();
    if line.len() > 200 {
        format!("{}...", &line[..200])
    } else {
        line.to_string()
    }
}
