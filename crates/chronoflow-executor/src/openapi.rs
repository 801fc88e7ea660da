//! Generic API call action: a method + path template + optional body
//! template, with `{{dotted.path}}` placeholders resolved from the
//! event payload before dispatch.

use serde_json::Value;

use chronoflow_api::RetryController;
use chronoflow_core::rule::OpenApiCallArgs;
use chronoflow_core::traits::{ApiResponse, HttpMethod, TrackerApi};
use chronoflow_core::{ChronoflowError, Result};
use chronoflow_engine::placeholder;

#[derive(Debug, Clone)]
pub struct OpenApiCall {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<String>,
}

impl OpenApiCall {
    /// Validate the raw args and resolve placeholders against the event
    /// payload. Path values are percent-encoded per segment; a body that
    /// parses as JSON is resolved structurally so quoting survives.
    pub fn from_args(args: &OpenApiCallArgs, payload: &Value) -> Result<Self> {
        let method = args
            .method
            .as_deref()
            .and_then(HttpMethod::parse)
            .ok_or_else(|| {
                ChronoflowError::InvalidAction(format!(
                    "openapi_call has invalid method '{}'",
                    args.method.as_deref().unwrap_or("")
                ))
            })?;
        let path_template = args
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ChronoflowError::InvalidAction("openapi_call is missing a path".into()))?;
        if !path_template.starts_with('/') {
            return Err(ChronoflowError::InvalidAction(format!(
                "openapi_call path must start with '/': '{path_template}'"
            )));
        }

        let body = match args.body.as_deref() {
            None => None,
            Some(template) => Some(match serde_json::from_str::<Value>(template) {
                Ok(mut json) => {
                    placeholder::resolve_in_json(&mut json, payload);
                    json.to_string()
                }
                Err(_) => placeholder::resolve(template, payload),
            }),
        };

        Ok(Self {
            method,
            path: placeholder::resolve_for_path(path_template, payload),
            body,
        })
    }

    pub async fn execute(
        &self,
        api: &dyn TrackerApi,
        retry: &RetryController,
    ) -> Result<ApiResponse> {
        let label = format!("{} {}", self.method.as_str(), self.path);
        retry
            .run(&label, || api.request(self.method, &self.path, self.body.clone()))
            .await
    }
}
