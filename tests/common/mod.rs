#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{redirect, StatusCode};
use serde_json::{json, Value};

use custom_modules_api::app::{self, AppState};
use custom_modules_api::config::AppConfig;
use custom_modules_api::store::MemoryStore;

pub const PASSWORD: &str = "secret-pass";

/// An in-process server on its own port with a fresh in-memory store
pub struct TestServer {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub fn test_config(seed_demo_data: bool) -> AppConfig {
    let mut config = AppConfig::development();
    config.server.enable_request_logging = false;
    config.bootstrap.seed_demo_data = seed_demo_data;
    config
}

pub async fn spawn_server() -> Result<TestServer> {
    spawn_with(test_config(false)).await
}

pub async fn spawn_with(config: AppConfig) -> Result<TestServer> {
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let state = AppState::new(Arc::new(MemoryStore::new()), config)?;
    app::bootstrap(&state).await?;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app::router(state)).await;
    });

    // Redirects are asserted on, never followed
    let client = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .timeout(Duration::from_secs(10))
        .build()?;

    Ok(TestServer { base_url: format!("http://127.0.0.1:{}", port), client })
}

/// Register a user and return the issued token. The first user becomes admin.
pub async fn register(server: &TestServer, username: &str) -> Result<String> {
    let res = server
        .client
        .post(server.url("/auth/register"))
        .json(&json!({"username": username, "password": PASSWORD}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED, "register {} failed", username);
    let body = res.json::<Value>().await?;
    body["data"]["token"]
        .as_str()
        .map(str::to_string)
        .context("register response carried no token")
}

/// Admin token plus a regular user token on a fresh server
pub async fn admin_and_user(server: &TestServer) -> Result<(String, String)> {
    let admin = register(server, "admin").await?;
    let user = register(server, "alice").await?;
    Ok((admin, user))
}

pub async fn create_module(server: &TestServer, token: &str, definition: Value) -> Result<Value> {
    let res = server
        .client
        .post(server.url("/api/modules"))
        .bearer_auth(token)
        .json(&definition)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED, "module create failed");
    Ok(res.json::<Value>().await?["data"].clone())
}

/// The salary module: two numeric inputs and a computed total
pub fn salary_definition() -> Value {
    json!({
        "name": "工资管理",
        "fields": [
            {"name": "员工姓名", "key": "empName", "type": "string", "required": true},
            {"name": "基本工资", "key": "baseSal", "type": "number", "required": true, "alias": "S1"},
            {"name": "绩效奖金", "key": "bonus", "type": "number", "alias": "S2"},
            {"name": "总计", "key": "total", "type": "compute", "formula": "[S1]+[S2]"}
        ]
    })
}

/// The router over a fresh in-memory store, for driving with `oneshot`
pub fn router() -> Result<axum::Router> {
    let state = AppState::new(Arc::new(MemoryStore::new()), test_config(false))?;
    Ok(app::router(state))
}

/// Send one request through the router; the body is parsed as JSON when present
pub async fn oneshot(
    app: &axum::Router,
    request: axum::http::Request<axum::body::Body>,
) -> Result<(StatusCode, axum::http::HeaderMap, Value)> {
    use tower::ServiceExt;

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, headers, body))
}
