//! Error taxonomy of the render pipeline.

use std::time::Duration;

use poem::http::StatusCode;
use serde_json::json;
use thiserror::Error;

use crate::core::options::ValidationError;
use crate::core::renderer::{InvokeError, RenderOutcome, sanitize_output};
use crate::core::reputation::{ReputationError, ReputationResult};
use crate::schemas::render::RenderFailure;

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Terminal failure of one render request. Nothing is retried internally.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("URL has not been scanned yet, try again later")]
    ReputationPending(ReputationResult),

    #[error("URL was flagged by the reputation check")]
    ReputationRejected(ReputationResult),

    #[error(transparent)]
    ReputationTransport(#[from] ReputationError),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Renderer ran but did not produce an artifact. `command` is sanitized.
    #[error("Rendering failed")]
    Render {
        command: String,
        outcome: RenderOutcome,
    },

    #[error("Rendering timed out after {}s", .after.as_secs_f64())]
    Timeout { command: String, after: Duration },

    #[error("{source}")]
    Invoke {
        command: String,
        #[source]
        source: InvokeError,
    },
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::ReputationPending(_) => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::ReputationRejected(_) => StatusCode::FORBIDDEN,
            PipelineError::ReputationTransport(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::OutputDir { .. }
            | PipelineError::Render { .. }
            | PipelineError::Invoke { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::ReputationPending(_)
                | PipelineError::ReputationTransport(_)
                | PipelineError::Timeout { .. }
        )
    }

    /// `{error, details}` body for the response layer. Never contains
    /// credentials: commands are sanitized before they get here and renderer
    /// output is scrubbed on the way out.
    pub fn to_failure(&self) -> RenderFailure {
        let details = match self {
            PipelineError::Validation(e) => json!({ "message": e.to_string() }),
            PipelineError::ReputationPending(result) => json!({
                "retryable": true,
                "virusResult": result,
            }),
            PipelineError::ReputationRejected(result) => json!({
                "retryable": false,
                "virusResult": result,
            }),
            PipelineError::ReputationTransport(e) => json!({ "message": e.to_string() }),
            PipelineError::OutputDir { path, source } => json!({
                "path": path,
                "message": source.to_string(),
            }),
            PipelineError::Render { command, outcome } => json!({
                "command": command,
                "render": {
                    "status": outcome.exit_code,
                    "output": sanitize_output(&outcome.output),
                    "finalOutput": sanitize_output(outcome.final_output()),
                },
            }),
            PipelineError::Timeout { command, after } => json!({
                "command": command,
                "timeoutSecs": after.as_secs_f64(),
            }),
            PipelineError::Invoke { command, source } => json!({
                "command": command,
                "message": source.to_string(),
            }),
        };

        RenderFailure {
            error: self.to_string(),
            details,
        }
    }
}
