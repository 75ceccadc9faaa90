//! Error types shared across the proxy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Sentinel error categories surfaced distinctly across both frontends.
///
/// Low-level failures (I/O, decode, non-2xx statuses) are wrapped into one of
/// these before they leave the fleet, so frontends can map them to HTTP
/// statuses and JSON-RPC codes without inspecting error text.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No backend offers this allowed tool.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    /// The backend exists but the resource is not in its allow-list.
    #[error("resource '{resource}' not allowed on server '{server}'")]
    ResourceNotAllowed { server: String, resource: String },

    /// No backend with this name is configured.
    #[error("server '{0}' not found")]
    BackendNotFound(String),

    /// Network/IO/decode failure or backend-reported error while talking to
    /// a backend.
    #[error("backend communication failed: {0}")]
    BackendCommunication(String),

    /// Malformed client input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend process could not be spawned.
    #[error("failed to start backend: {0}")]
    Startup(String),

    /// Bug or otherwise unexpected condition inside the proxy.
    #[error("internal proxy error: {0}")]
    Internal(String),
}
