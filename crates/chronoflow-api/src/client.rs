//! REST client for the remote time-tracking API.
//!
//! One client per workspace installation (base URL + addon token).
//! Non-2xx responses map to `ChronoflowError::Api` and network failures
//! to `ChronoflowError::Transport` so the retry controller can classify
//! them without knowing anything about HTTP.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use chronoflow_core::error::truncate_body;
use chronoflow_core::traits::{ApiResponse, ClientFactory, HttpMethod, TrackerApi};
use chronoflow_core::{ChronoflowError, Result};

const TOKEN_HEADER: &str = "X-Addon-Token";
const NEXT_PAGE_HEADER: &str = "X-Next-Page";
const PAGE_SIZE: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RestTrackerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestTrackerClient {
    pub fn new(base_url: &str, token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<String>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method, url).header(TOKEN_HEADER, &self.token);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        request
            .send()
            .await
            .map_err(|e| ChronoflowError::Transport(e.to_string()))
    }

    /// Turn a non-2xx response into an Api error, keeping the parsed
    /// Retry-After header for the retry controller.
    async fn api_error(response: reqwest::Response) -> ChronoflowError {
        let status = response.status().as_u16();
        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1_000));
        let body = response.text().await.unwrap_or_default();
        ChronoflowError::Api {
            status,
            body: truncate_body(body),
            retry_after_ms,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.send(reqwest::Method::GET, &self.url(path), None).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ChronoflowError::Transport(e.to_string()))
    }

    /// Fetch every page of a list endpoint. The service advertises the
    /// next page in `X-Next-Page`; a full page without the header still
    /// continues sequentially.
    async fn get_paginated(&self, path: &str) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        let mut page: u32 = 1;
        loop {
            let url = format!("{}?page-size={PAGE_SIZE}&page={page}", self.url(path));
            let response = self.send(reqwest::Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }
            let next_page = response
                .headers()
                .get(NEXT_PAGE_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());
            let batch: Vec<Value> = response
                .json()
                .await
                .map_err(|e| ChronoflowError::Transport(e.to_string()))?;
            let batch_len = batch.len();
            results.extend(batch);

            match next_page {
                Some(next) if next > page && batch_len > 0 => page = next,
                None if batch_len == PAGE_SIZE => page += 1,
                _ => break,
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl TrackerApi for RestTrackerClient {
    async fn get_time_entry(&self, workspace_id: &str, entry_id: &str) -> Result<Value> {
        self.get_json(&entry_path(workspace_id, entry_id)).await
    }

    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: Value,
    ) -> Result<Value> {
        let existing = self.get_time_entry(workspace_id, entry_id).await?;
        let merged = merged_entity(existing, patch);
        let body = serde_json::to_string(&merged)?;
        let url = self.url(&entry_path(workspace_id, entry_id));
        let response = self.send(reqwest::Method::PUT, &url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ChronoflowError::Transport(e.to_string()))
    }

    async fn get_tags(&self, workspace_id: &str) -> Result<Vec<Value>> {
        self.get_paginated(&workspace_path(workspace_id, "tags")).await
    }

    async fn create_tag(&self, workspace_id: &str, name: &str) -> Result<Value> {
        let url = self.url(&workspace_path(workspace_id, "tags"));
        let body = serde_json::to_string(&json!({ "name": name }))?;
        let response = self.send(reqwest::Method::POST, &url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ChronoflowError::Transport(e.to_string()))
    }

    async fn get_projects(&self, workspace_id: &str) -> Result<Vec<Value>> {
        self.get_paginated(&workspace_path(workspace_id, "projects")).await
    }

    async fn get_clients(&self, workspace_id: &str) -> Result<Vec<Value>> {
        self.get_paginated(&workspace_path(workspace_id, "clients")).await
    }

    async fn get_users(&self, workspace_id: &str) -> Result<Vec<Value>> {
        self.get_paginated(&workspace_path(workspace_id, "users")).await
    }

    async fn get_tasks(&self, workspace_id: &str, project_id: &str) -> Result<Vec<Value>> {
        let path = format!(
            "/workspaces/{}/projects/{}/tasks",
            urlencoding::encode(workspace_id),
            urlencoding::encode(project_id)
        );
        self.get_paginated(&path).await
    }

    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<ApiResponse> {
        let method = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let response = self.send(method, &self.url(path), body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(response).await);
        }
        let body = response
            .text()
            .await
            .map_err(|e| ChronoflowError::Transport(e.to_string()))?;
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

fn workspace_path(workspace_id: &str, resource: &str) -> String {
    format!("/workspaces/{}/{resource}", urlencoding::encode(workspace_id))
}

fn entry_path(workspace_id: &str, entry_id: &str) -> String {
    format!(
        "/workspaces/{}/time-entries/{}",
        urlencoding::encode(workspace_id),
        urlencoding::encode(entry_id)
    )
}

/// Fold a patch onto a freshly fetched entity for a full-entity PUT.
/// The service returns interval bounds nested under `timeInterval` but
/// expects them at the root on write, so they are hoisted first.
pub fn merged_entity(mut existing: Value, patch: Value) -> Value {
    if let Some(interval) = existing.get("timeInterval").cloned() {
        for key in ["start", "end"] {
            if existing.get(key).is_none() {
                if let Some(bound) = interval.get(key) {
                    if !bound.is_null() {
                        existing[key] = bound.clone();
                    }
                }
            }
        }
    }
    if let (Some(root), Value::Object(patch_map)) = (existing.as_object_mut(), patch) {
        for (key, value) in patch_map {
            root.insert(key, value);
        }
    }
    existing
}

/// Builds one `RestTrackerClient` per workspace installation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestClientFactory;

impl ClientFactory for RestClientFactory {
    fn create(&self, api_base_url: &str, token: &str) -> Arc<dyn TrackerApi> {
        Arc::new(RestTrackerClient::new(api_base_url, token))
    }
}
