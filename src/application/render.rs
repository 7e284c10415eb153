//! Contract between the render orchestrator and whatever turns a visit into HTML.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use visitor_types::RenderRequest;

#[derive(Debug, Error)]
pub enum RenderGatewayError {
    #[error("server-side rendering is disabled")]
    Disabled,
    #[error("server-side rendering bundle `{}` does not exist", path.display())]
    BundleMissing { path: PathBuf },
    #[error("render request could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("render gateway unreachable: {message}")]
    Transport { message: String },
    #[error("render gateway answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("render gateway returned an empty body")]
    EmptyBody,
}

impl RenderGatewayError {
    /// Errors caused by local setup rather than by the gateway itself.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Disabled | Self::BundleMissing { .. })
    }
}

/// Produces the HTML for a visit. Failures are never retried.
#[async_trait]
pub trait RenderGateway: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderGatewayError>;
}
