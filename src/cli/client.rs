//! HTTP client for the server API, unwrapping the `{success, data}` envelope.

use anyhow::Context;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::config::{current_server, load_environment_config};

/// Error body returned by the API, surfaced as the CLI error message
#[derive(Debug, thiserror::Error)]
#[error("{message} ({status})")]
pub struct ApiClientError {
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
    pub field_errors: Option<Value>,
}

/// Listing options for `GET /api/modules/:id/rows`
#[derive(Debug, Default, Clone, Serialize)]
pub struct RowListParams {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Client for the current server, carrying the saved token if any
    pub fn from_config() -> anyhow::Result<Self> {
        let (_, server) = current_server()?;
        let env = load_environment_config()?;
        Ok(Self::new(server.url())?.with_token(env.token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> anyhow::Result<Value> {
        let response = builder.send().await.context("request failed")?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(ApiClientError {
                status,
                code: body.get("code").and_then(Value::as_str).map(str::to_string),
                message: body
                    .get("message")
                    .or_else(|| body.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string(),
                field_errors: body.get("field_errors").cloned(),
            }
            .into());
        }

        Ok(body.get("data").cloned().unwrap_or(body))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.request(Method::DELETE, path)).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(self.request(Method::PUT, path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    pub async fn health(&self) -> anyhow::Result<Value> {
        self.get("/health").await
    }

    pub async fn login(&self, username: &str, password: &str) -> anyhow::Result<Value> {
        self.post("/auth/login", &json!({"username": username, "password": password}))
            .await
    }

    pub async fn register(&self, username: &str, password: &str) -> anyhow::Result<Value> {
        self.post("/auth/register", &json!({"username": username, "password": password}))
            .await
    }

    pub async fn whoami(&self) -> anyhow::Result<Value> {
        self.get("/api/auth/whoami").await
    }

    pub async fn refresh(&self) -> anyhow::Result<Value> {
        self.send(self.request(Method::PUT, "/api/auth/refresh")).await
    }

    pub async fn logout(&self) -> anyhow::Result<Value> {
        self.send(self.request(Method::POST, "/api/auth/logout")).await
    }

    pub async fn list_modules(&self) -> anyhow::Result<Value> {
        self.get("/api/modules").await
    }

    pub async fn get_module(&self, id: &str) -> anyhow::Result<Value> {
        self.get(&format!("/api/modules/{}", id)).await
    }

    pub async fn create_module(&self, definition: &Value) -> anyhow::Result<Value> {
        self.post("/api/modules", definition).await
    }

    pub async fn update_module(&self, id: &str, definition: &Value) -> anyhow::Result<Value> {
        self.put(&format!("/api/modules/{}", id), definition).await
    }

    pub async fn delete_module(&self, id: &str) -> anyhow::Result<Value> {
        self.delete(&format!("/api/modules/{}", id)).await
    }

    pub async fn list_rows(&self, module_id: &str, params: &RowListParams) -> anyhow::Result<Value> {
        let builder = self
            .request(Method::GET, &format!("/api/modules/{}/rows", module_id))
            .query(params);
        self.send(builder).await
    }

    pub async fn get_row(&self, module_id: &str, key: &str) -> anyhow::Result<Value> {
        self.get(&format!("/api/modules/{}/rows/{}", module_id, key)).await
    }

    pub async fn add_row(&self, module_id: &str, values: &Value) -> anyhow::Result<Value> {
        self.post(&format!("/api/modules/{}/rows", module_id), values).await
    }

    /// PATCH by default; `replace` sends a full PUT
    pub async fn update_row(&self, module_id: &str, key: &str, values: &Value, replace: bool) -> anyhow::Result<Value> {
        let path = format!("/api/modules/{}/rows/{}", module_id, key);
        if replace {
            self.put(&path, values).await
        } else {
            self.patch(&path, values).await
        }
    }

    pub async fn delete_row(&self, module_id: &str, key: &str) -> anyhow::Result<Value> {
        self.delete(&format!("/api/modules/{}/rows/{}", module_id, key)).await
    }

    pub async fn collections(&self) -> anyhow::Result<Value> {
        self.get("/api/collections").await
    }
}
