//! Generative reasoning backends.
//!
//! The security and logic agents talk to a [`ReasoningBackend`]: one call
//! taking a system role and a prompt built from curated snippets, returning
//! the raw reply text or a typed [`BackendError`].

mod heuristic;
mod ollama;
mod retry;

pub use heuristic::{HeuristicBackend, ROLE_MARKER, SNIPPET_MARKER};
pub use ollama::OllamaBackend;
pub use retry::RetryPolicy;

use crate::config::{BackendConfig, BackendProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to a reasoning backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("cannot connect to backend: {0}")]
    Connect(String),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },

    #[error("request cancelled")]
    Cancelled,
}

impl BackendError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Timeout { .. } | BackendError::Connect(_) => true,
            BackendError::Http { status, .. } => *status == 429 || *status >= 500,
            BackendError::InvalidResponse(_)
            | BackendError::DeadlineExceeded { .. }
            | BackendError::Cancelled => false,
        }
    }
}

/// A text-completion service used by the generative agents.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Short label for logs and reports.
    fn name(&self) -> &str;

    /// Complete `prompt` under the given system role.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, BackendError>;
}

/// Build the backend selected in configuration.
pub fn from_config(
    config: &BackendConfig,
    request_timeout: Duration,
) -> anyhow::Result<Arc<dyn ReasoningBackend>> {
    let backend: Arc<dyn ReasoningBackend> = match config.provider {
        BackendProvider::Ollama => Arc::new(OllamaBackend::new(config, request_timeout)?),
        BackendProvider::Heuristic => Arc::new(HeuristicBackend::new()),
    };
    Ok(backend)
}
