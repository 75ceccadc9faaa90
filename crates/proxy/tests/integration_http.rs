//! End-to-end tests for the HTTP frontend against in-process mock backends.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get, post},
    Json, Router,
};
use mcp_proxy::config::{BackendConfig, Config};
use mcp_proxy::fleet::Fleet;
use mcp_proxy::http::{router, AppState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct MockBackend {
    tools: Vec<Value>,
    resources: Vec<Value>,
    /// Last tool call seen: (tool name, decoded body).
    captured: Arc<Mutex<Option<(String, Value)>>>,
}

impl MockBackend {
    fn new(tools: &[&str], resources: &[&str]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                .collect(),
            resources: resources
                .iter()
                .map(|name| json!({"name": name, "uri": format!("file:///{name}")}))
                .collect(),
            captured: Arc::new(Mutex::new(None)),
        }
    }
}

async fn mock_tools(State(state): State<MockBackend>) -> Json<Value> {
    Json(json!({"tools": state.tools}))
}

async fn mock_resources(State(state): State<MockBackend>) -> Json<Value> {
    Json(json!({"resources": state.resources}))
}

async fn mock_call_tool(
    State(state): State<MockBackend>,
    Path(name): Path<String>,
    body: Bytes,
) -> Json<Value> {
    let decoded: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    *state.captured.lock().unwrap() = Some((name, decoded));
    Json(json!({"content": [{"type": "text", "text": "ok"}], "isError": false}))
}

async fn mock_resource_down() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "backend exploded")
}

async fn mock_resource_ok() -> impl IntoResponse {
    (StatusCode::OK, [("x-test", "yes")], "hello")
}

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

async fn spawn_mock_backend(mock: MockBackend) -> SocketAddr {
    let app = Router::new()
        .route("/tools", get(mock_tools))
        .route("/resources", get(mock_resources))
        .route("/tool/{name}", post(mock_call_tool))
        .route("/resource/r1/x", any(mock_resource_down))
        .route("/resource/r2/ok", any(mock_resource_ok))
        .with_state(mock);
    spawn_app(app).await
}

fn http_server(name: &str, addr: SocketAddr, allowed_tools: &[&str]) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        address: Some(format!("http://{addr}")),
        allowed_tools: allowed_tools.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

async fn spawn_proxy(config: Config) -> (SocketAddr, Arc<Fleet>) {
    let fleet = Arc::new(Fleet::new(config).await.expect("fleet"));
    let app = router(Arc::new(AppState {
        fleet: Arc::clone(&fleet),
    }));
    let addr = spawn_app(app).await;
    (addr, fleet)
}

#[tokio::test]
async fn tools_listing_fans_in_across_backends() {
    let a = MockBackend::new(&["t1", "t2"], &[]);
    let b = MockBackend::new(&["t3"], &[]);
    let a_addr = spawn_mock_backend(a).await;
    let b_addr = spawn_mock_backend(b).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![
            http_server("A", a_addr, &[]),
            http_server("B", b_addr, &[]),
        ],
    })
    .await;

    let body: Value = reqwest::get(format!("http://{proxy}/tools"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    let names: Vec<&str> = body["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["t1", "t2", "t3"]);
}

#[tokio::test]
async fn tool_call_routes_to_owning_backend() {
    let a = MockBackend::new(&["t1"], &[]);
    let b = MockBackend::new(&["t3"], &[]);
    let b_captured = Arc::clone(&b.captured);
    let a_addr = spawn_mock_backend(a).await;
    let b_addr = spawn_mock_backend(b).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![
            http_server("A", a_addr, &["t1"]),
            http_server("B", b_addr, &["t3"]),
        ],
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy}/tool/t3"))
        .json(&json!({"x": 1}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(
        body,
        json!({"content": [{"type": "text", "text": "ok"}], "isError": false})
    );

    let captured = b_captured.lock().unwrap().clone();
    assert_eq!(captured, Some(("t3".to_string(), json!({"x": 1}))));
}

#[tokio::test]
async fn unknown_tool_returns_404_with_standard_message() {
    let a = MockBackend::new(&["t1"], &[]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &["t1"])],
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy}/tool/tNope"))
        .json(&json!({}))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("json");
    assert_eq!(
        body,
        json!({"error": "Tool 'tNope' not found or not provided by any configured server"})
    );
}

#[tokio::test]
async fn empty_tool_call_body_is_treated_as_empty_arguments() {
    let a = MockBackend::new(&["t1"], &[]);
    let captured = Arc::clone(&a.captured);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &["t1"])],
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy}/tool/t1"))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    let seen = captured.lock().unwrap().clone();
    assert_eq!(seen, Some(("t1".to_string(), json!({}))));
}

#[tokio::test]
async fn malformed_tool_call_body_is_a_400() {
    let a = MockBackend::new(&["t1"], &[]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &["t1"])],
    })
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{proxy}/tool/t1"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn backend_5xx_on_resource_becomes_a_gateway_error() {
    let a = MockBackend::new(&[], &["r1"]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &[])],
    })
    .await;

    let response = reqwest::get(format!("http://{proxy}/resource/A/r1/x"))
        .await
        .expect("request");

    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body, json!({"error": "backend server 'A' returned an error"}));
}

#[tokio::test]
async fn resource_access_forwards_status_headers_and_body() {
    let a = MockBackend::new(&[], &["r2"]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &[])],
    })
    .await;

    let response = reqwest::get(format!("http://{proxy}/resource/A/r2/ok"))
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-test").map(|v| v.to_str().unwrap()),
        Some("yes")
    );
    assert_eq!(response.text().await.expect("body"), "hello");
}

#[tokio::test]
async fn unknown_backend_and_disallowed_resource_are_rejected() {
    let a = MockBackend::new(&[], &["r1"]);
    let a_addr = spawn_mock_backend(a).await;

    let mut config = http_server("A", a_addr, &[]);
    config.allowed_resources = vec!["r1".to_string()];
    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![config],
    })
    .await;

    let response = reqwest::get(format!("http://{proxy}/resource/Zed/r1/x"))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body, json!({"error": "server 'Zed' not found"}));

    let response = reqwest::get(format!("http://{proxy}/resource/A/rX/x"))
        .await
        .expect("request");
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.expect("json");
    assert_eq!(
        body,
        json!({"error": "resource 'rX' not allowed on server 'A'"})
    );
}

#[tokio::test]
async fn restricted_listing_tags_entries_with_the_owning_backend() {
    let a = MockBackend::new(&["t1", "t2"], &[]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &["t1"])],
    })
    .await;

    let body: Value = reqwest::get(format!("http://{proxy}/restricted-tools"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    let tools = body["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "t2");
    assert_eq!(tools[0]["serverName"], "A");

    // The allowed and restricted views are disjoint and cover the raw set.
    let allowed: Value = reqwest::get(format!("http://{proxy}/tools"))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    let allowed_names: Vec<&str> = allowed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(allowed_names, vec!["t1"]);
}

#[tokio::test]
async fn metrics_and_health_endpoints_respond() {
    let a = MockBackend::new(&["t1"], &[]);
    let a_addr = spawn_mock_backend(a).await;

    let (proxy, _fleet) = spawn_proxy(Config {
        mcp_servers: vec![http_server("A", a_addr, &[])],
    })
    .await;

    let response = reqwest::get(format!("http://{proxy}/health"))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);

    // Drive one request through so the counters exist.
    let _ = reqwest::get(format!("http://{proxy}/tools")).await;

    let text = reqwest::get(format!("http://{proxy}/metrics"))
        .await
        .expect("request")
        .text()
        .await
        .expect("text");
    assert!(
        text.contains("mcp_proxy_requests_total"),
        "missing counter in: {text}"
    );
}
