//! The proxy core: owns all backends, routes tool calls and resource
//! accesses to the unique owning backend, and coordinates ordered shutdown.

use crate::backend::{
    Backend, BackendStatus, CallToolResult, JsonObject, ProxyRequestInput, ProxyResponse,
    ResourceInfo, ToolInfo,
};
use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::timeouts::CATALOG_REFRESH_INTERVAL;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A restricted tool tagged with its owning backend.
///
/// The tag is part of the public listing contract.
#[derive(Debug, Clone, Serialize)]
pub struct RestrictedToolInfo {
    #[serde(flatten)]
    pub tool: ToolInfo,
    #[serde(rename = "serverName")]
    pub server_name: String,
}

/// A restricted resource tagged with its owning backend.
#[derive(Debug, Clone, Serialize)]
pub struct RestrictedResourceInfo {
    #[serde(flatten)]
    pub resource: ResourceInfo,
    #[serde(rename = "serverName")]
    pub server_name: String,
}

/// Owns every configured backend, in config order.
pub struct Fleet {
    backends: Vec<Arc<Backend>>,
    shutdown: CancellationToken,
}

impl Fleet {
    /// Build the fleet from a validated configuration.
    ///
    /// Subprocess backends are spawned immediately; a spawn failure is fatal.
    /// The initial catalog refresh is attempted for every backend but
    /// failures are only logged. Periodic refresh tasks run until shutdown.
    pub async fn new(config: Config) -> Result<Self> {
        let mut backends = Vec::with_capacity(config.mcp_servers.len());
        for server_config in config.mcp_servers {
            backends.push(Arc::new(Backend::new(server_config)?));
        }

        let fleet = Self {
            backends,
            shutdown: CancellationToken::new(),
        };

        for backend in &fleet.backends {
            backend.start().await?;
            if let Err(e) = backend.refresh_catalog().await {
                tracing::warn!(
                    "failed to fetch tools/resources for server '{}': {e}",
                    backend.name()
                );
            }
        }

        fleet.warn_duplicate_tools();
        fleet.spawn_periodic_refresh();
        Ok(fleet)
    }

    /// First match wins on routing; overlapping allow-lists are an operator
    /// mistake worth a startup warning.
    fn warn_duplicate_tools(&self) {
        let mut owners: HashMap<String, String> = HashMap::new();
        for backend in &self.backends {
            for tool in backend.tools() {
                if let Some(first) = owners.get(&tool.name).cloned() {
                    tracing::warn!(
                        "tool '{}' is exposed by both '{first}' and '{}'; calls will route to '{first}'",
                        tool.name,
                        backend.name()
                    );
                } else {
                    owners.insert(tool.name, backend.name().to_string());
                }
            }
        }
    }

    fn spawn_periodic_refresh(&self) {
        for backend in &self.backends {
            let backend = Arc::clone(backend);
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(CATALOG_REFRESH_INTERVAL);
                // The first tick completes immediately; the initial refresh
                // already happened at construction.
                interval.tick().await;
                loop {
                    tokio::select! {
                        () = token.cancelled() => return,
                        _ = interval.tick() => {
                            if let Err(e) = backend.refresh_catalog().await {
                                tracing::warn!(
                                    "periodic refresh failed for server '{}': {e}",
                                    backend.name()
                                );
                            }
                        }
                    }
                }
            });
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Linear scan by name, first match.
    pub fn backend(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .map(Arc::clone)
    }

    /// First backend in config order whose allow-list admits the tool.
    pub fn backend_for_tool(&self, tool_name: &str) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .find(|b| b.is_tool_allowed(tool_name))
            .map(Arc::clone)
    }

    /// First backend in config order whose allow-list admits the resource.
    pub fn backend_for_resource(&self, resource_name: &str) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .find(|b| b.is_resource_allowed(resource_name))
            .map(Arc::clone)
    }

    /// Resolve the backend for a named resource access, enforcing the
    /// allow-list.
    pub fn resolve_resource_backend(
        &self,
        server_name: &str,
        resource_name: &str,
    ) -> Result<Arc<Backend>> {
        let backend = self
            .backend(server_name)
            .ok_or_else(|| ProxyError::BackendNotFound(server_name.to_string()))?;
        if !backend.is_resource_allowed(resource_name) {
            return Err(ProxyError::ResourceNotAllowed {
                server: server_name.to_string(),
                resource: resource_name.to_string(),
            });
        }
        Ok(backend)
    }

    // ------------------------------------------------------------------
    // Aggregated listings
    // ------------------------------------------------------------------

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.backends.iter().flat_map(|b| b.tools()).collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.backends.iter().flat_map(|b| b.resources()).collect()
    }

    pub fn list_restricted_tools(&self) -> Vec<RestrictedToolInfo> {
        self.backends
            .iter()
            .flat_map(|b| {
                let server_name = b.name().to_string();
                b.restricted_tools()
                    .into_iter()
                    .map(move |tool| RestrictedToolInfo {
                        tool,
                        server_name: server_name.clone(),
                    })
            })
            .collect()
    }

    pub fn list_restricted_resources(&self) -> Vec<RestrictedResourceInfo> {
        self.backends
            .iter()
            .flat_map(|b| {
                let server_name = b.name().to_string();
                b.restricted_resources()
                    .into_iter()
                    .map(move |resource| RestrictedResourceInfo {
                        resource,
                        server_name: server_name.clone(),
                    })
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.backends.iter().map(|b| b.status()).collect()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Route a tool call to the owning backend and execute it.
    pub async fn call_tool(&self, name: &str, arguments: JsonObject) -> Result<CallToolResult> {
        let backend = self
            .backend_for_tool(name)
            .ok_or_else(|| ProxyError::ToolNotFound(name.to_string()))?;
        backend.call_tool(name, arguments).await
    }

    /// Forward a generic resource-style request to a named backend.
    pub async fn proxy_request(
        &self,
        backend: &Backend,
        input: &ProxyRequestInput,
    ) -> Result<ProxyResponse> {
        backend.proxy_request(input).await
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop periodic refresh and shut every backend down, in order.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down all MCP servers");
        self.shutdown.cancel();
        for backend in &self.backends {
            backend.shutdown().await;
        }
    }
}
