//! HTTP frontend: routes, request tracking, and graceful shutdown.

use crate::backend::ProxyRequestInput;
use crate::error::ProxyError;
use crate::fleet::Fleet;
use crate::http_backend::is_hop_by_hop;
use crate::metrics;
use crate::timeouts::FRONTEND_SHUTDOWN_GRACE;
use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Path, RawQuery, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Shared application state.
pub struct AppState {
    pub fleet: Arc<Fleet>,
}

/// Create the HTTP router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools", get(tools))
        .route("/restricted-tools", get(restricted_tools))
        .route("/resources", get(resources))
        .route("/restricted-resources", get(restricted_resources))
        .route("/tool/{toolName}", post(call_tool))
        .route("/resource/{serverName}/{resourceName}", any(resource_proxy_root))
        .route(
            "/resource/{serverName}/{resourceName}/{*proxyPath}",
            any(resource_proxy),
        )
        .route("/metrics", get(metrics_exposition))
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(middleware::from_fn(track_request))
        .with_state(state)
}

/// Log every request and record it in the Prometheus metrics, labeled by the
/// route template rather than the concrete path.
async fn track_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| path.clone(), |m| m.as_str().to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status().as_u16();

    tracing::info!("{method} {path} {status} {duration:?}");

    let metrics = metrics::metrics();
    metrics
        .requests_total
        .with_label_values(&[method.as_str(), &endpoint, &status.to_string()])
        .inc();
    metrics
        .request_duration
        .with_label_values(&[method.as_str(), &endpoint])
        .observe(duration.as_secs_f64());

    response
}

// ============================================================================
// Listings
// ============================================================================

async fn tools(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"tools": state.fleet.list_tools()})).into_response()
}

async fn restricted_tools(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"tools": state.fleet.list_restricted_tools()})).into_response()
}

async fn resources(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"resources": state.fleet.list_resources()})).into_response()
}

async fn restricted_resources(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"resources": state.fleet.list_restricted_resources()})).into_response()
}

// ============================================================================
// Tool Calls
// ============================================================================

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(tool_name): Path<String>,
    body: Bytes,
) -> Response {
    // An empty body is an empty argument object, not a parse error.
    let arguments = if body.is_empty() {
        serde_json::Map::new()
    } else {
        match serde_json::from_slice(&body) {
            Ok(arguments) => arguments,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("Invalid request body: {e}")})),
                )
                    .into_response();
            }
        }
    };

    match state.fleet.call_tool(&tool_name, arguments).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(err) => {
            tracing::error!("error calling tool '{tool_name}': {err}");
            let (status, message) = match &err {
                ProxyError::ToolNotFound(_) => (
                    StatusCode::NOT_FOUND,
                    format!("Tool '{tool_name}' not found or not provided by any configured server"),
                ),
                ProxyError::BackendCommunication(_) => (
                    StatusCode::BAD_GATEWAY,
                    format!("Error communicating with backend server for tool '{tool_name}'"),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error processing tool '{tool_name}'"),
                ),
            };
            (status, Json(json!({"error": message}))).into_response()
        }
    }
}

// ============================================================================
// Resource Proxying
// ============================================================================

async fn resource_proxy_root(
    State(state): State<Arc<AppState>>,
    Path((server_name, resource_name)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_resource(
        &state,
        &server_name,
        &resource_name,
        String::new(),
        method,
        query.unwrap_or_default(),
        &headers,
        body,
    )
    .await
}

async fn resource_proxy(
    State(state): State<Arc<AppState>>,
    Path((server_name, resource_name, proxy_path)): Path<(String, String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward_resource(
        &state,
        &server_name,
        &resource_name,
        format!("/{proxy_path}"),
        method,
        query.unwrap_or_default(),
        &headers,
        body,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn forward_resource(
    state: &AppState,
    server_name: &str,
    resource_name: &str,
    proxy_path: String,
    method: Method,
    query: String,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let backend = match state.fleet.resolve_resource_backend(server_name, resource_name) {
        Ok(backend) => backend,
        Err(ProxyError::BackendNotFound(_)) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("server '{server_name}' not found")})),
            )
                .into_response();
        }
        Err(_) => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "error": format!(
                        "resource '{resource_name}' not allowed on server '{server_name}'"
                    )
                })),
            )
                .into_response();
        }
    };

    let input = ProxyRequestInput {
        method: method.to_string(),
        path: format!("/resource/{resource_name}{proxy_path}"),
        query,
        headers: header_map_to_wire(headers),
        body: body.to_vec(),
    };

    let output = match state.fleet.proxy_request(&backend, &input).await {
        Ok(output) => output,
        Err(err) => {
            tracing::error!("error proxying request to server '{server_name}': {err}");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "failed to proxy request to backend server"})),
            )
                .into_response();
        }
    };

    // The proxy asserts that the backend failed rather than forwarding an
    // arbitrary 5xx.
    if output.status >= 500 {
        tracing::error!(
            "backend server '{server_name}' returned status {} for {} {}",
            output.status,
            input.method,
            input.path
        );
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": format!("backend server '{server_name}' returned an error")
            })),
        )
            .into_response();
    }

    let status = StatusCode::from_u16(output.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, values) in &output.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(value) = HeaderValue::from_str(value) {
                    response_headers.append(name.clone(), value);
                }
            }
        }
    }
    builder
        .body(Body::from(output.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn header_map_to_wire(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut wire: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        wire.entry(name.as_str().to_string())
            .or_default()
            .push(value.to_string());
    }
    wire
}

// ============================================================================
// Operational Endpoints
// ============================================================================

async fn metrics_exposition() -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
        .into_response()
}

async fn health() -> Response {
    Json(json!({"status": "healthy"})).into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let servers: HashMap<String, _> = state
        .fleet
        .statuses()
        .into_iter()
        .map(|s| (s.name.clone(), s))
        .collect();
    Json(json!({"servers": servers})).into_response()
}

// ============================================================================
// Server
// ============================================================================

/// Run the HTTP frontend until an interrupt or termination signal arrives,
/// then drain in-flight handlers and shut the fleet down.
pub async fn serve(fleet: Arc<Fleet>, addr: SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        fleet: Arc::clone(&fleet),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting MCP proxy HTTP server on {addr}");

    let stop = CancellationToken::new();
    let stop_signal = stop.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_signal.cancelled().await })
            .await
    });

    shutdown_signal().await;
    tracing::info!("Shutting down MCP proxy HTTP server...");
    stop.cancel();

    match tokio::time::timeout(FRONTEND_SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("HTTP server shutdown complete"),
        Ok(Ok(Err(e))) => tracing::error!("HTTP server stopped with error: {e}"),
        Ok(Err(e)) => tracing::error!("HTTP server task failed: {e}"),
        Err(_) => tracing::warn!(
            "HTTP server did not drain within {}s",
            FRONTEND_SHUTDOWN_GRACE.as_secs()
        ),
    }

    fleet.shutdown().await;
    tracing::info!("MCP proxy has been shut down gracefully");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
