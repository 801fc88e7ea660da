//! Trait seams for external collaborators.
//!
//! Rule persistence, installation tokens and the remote tracker API all
//! live outside this workspace; the router only sees these traits.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{ChronoflowError, Result};
use crate::rule::Rule;

/// External rule persistence (DB- or KV-backed).
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules for a workspace, in the store's iteration order.
    async fn get_enabled(&self, workspace_id: &str) -> Result<Vec<Rule>>;

    /// All known workspace ids. Best-effort: stores that cannot
    /// enumerate return an error and callers degrade gracefully.
    async fn list_workspaces(&self) -> Result<Vec<String>> {
        Err(ChronoflowError::Store(
            "workspace enumeration not supported".into(),
        ))
    }
}

/// Per-workspace API credentials captured at addon installation.
#[derive(Debug, Clone)]
pub struct WorkspaceToken {
    pub api_base_url: String,
    pub token: String,
}

pub trait TokenStore: Send + Sync {
    fn get(&self, workspace_id: &str) -> Option<WorkspaceToken>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Successful (2xx) response from a generic API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// The remote time-tracking API, scoped to one workspace's base URL and
/// token. Implementations return `ChronoflowError::Api` for non-2xx
/// statuses and `ChronoflowError::Transport` for network failures so the
/// retry controller can classify them.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    async fn get_time_entry(&self, workspace_id: &str, entry_id: &str) -> Result<Value>;

    /// Merged full-entity PUT; the implementation folds the patch onto a
    /// freshly fetched entity before writing.
    async fn update_time_entry(
        &self,
        workspace_id: &str,
        entry_id: &str,
        patch: Value,
    ) -> Result<Value>;

    async fn get_tags(&self, workspace_id: &str) -> Result<Vec<Value>>;
    async fn create_tag(&self, workspace_id: &str, name: &str) -> Result<Value>;
    async fn get_projects(&self, workspace_id: &str) -> Result<Vec<Value>>;
    async fn get_clients(&self, workspace_id: &str) -> Result<Vec<Value>>;
    async fn get_users(&self, workspace_id: &str) -> Result<Vec<Value>>;
    async fn get_tasks(&self, workspace_id: &str, project_id: &str) -> Result<Vec<Value>>;

    /// Generic escape hatch used by `openapi_call` actions.
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> Result<ApiResponse>;
}

/// Builds a per-workspace API client from installation credentials.
pub trait ClientFactory: Send + Sync {
    fn create(&self, api_base_url: &str, token: &str) -> Arc<dyn TrackerApi>;
}
