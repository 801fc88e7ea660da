//! Error type shared across the workspace.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChronoflowError>;

#[derive(Debug, Error)]
pub enum ChronoflowError {
    /// Remote API answered with a non-2xx status.
    #[error("tracker API returned status {status}: {body}")]
    Api {
        status: u16,
        /// Response body, truncated to 512 bytes.
        body: String,
        /// Parsed `Retry-After` header, if the response carried one.
        retry_after_ms: Option<u64>,
    },

    /// Request never produced a response (DNS, connect, timeout, ...).
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("no installation token for workspace {0}")]
    MissingToken(String),

    #[error("rule store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl ChronoflowError {
    /// Transient failures worth retrying: 429, 5xx, and transport errors.
    /// Every other API status is treated as fatal for the attempted call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Transport(_) => true,
            _ => false,
        }
    }

    /// Server-suggested retry delay, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Api { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: truncate_body(body.into()),
            retry_after_ms: None,
        }
    }
}

/// Keep API error bodies bounded so they stay loggable.
pub fn truncate_body(body: String) -> String {
    if body.len() <= 512 {
        body
    } else {
        let mut end = 512;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}
