use std::{path::PathBuf, time::Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;
use visitor_types::RenderRequest;

use crate::{
    application::render::{RenderGateway, RenderGatewayError},
    config::SsrSettings,
    infra::error::InfraError,
};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Answer of the gateway `/health` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub timestamp: i64,
}

/// HTTP client of an out-of-process render gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
    enabled: bool,
    bundle: PathBuf,
}

impl GatewayClient {
    pub fn new(settings: &SsrSettings) -> Result<Self, InfraError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|err| {
            InfraError::configuration(format!("failed to build render gateway client: {err}"))
        })?;

        Ok(Self {
            http,
            base: settings.url.clone(),
            enabled: settings.enabled,
            bundle: settings.bundle.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn health(&self) -> Result<GatewayHealth, RenderGatewayError> {
        let response = self
            .http
            .get(endpoint(&self.base, "health"))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderGatewayError::Status {
                status: status.as_u16(),
                body: truncate(response.text().await.unwrap_or_default()),
            });
        }

        response.json().await.map_err(transport_error)
    }

    /// Ask the gateway to stop.
    ///
    /// A server that answers, or drops the connection while going down, counts as stopped.
    /// Only an unreachable server is an error.
    pub async fn shutdown(&self) -> Result<(), RenderGatewayError> {
        match self.http.post(endpoint(&self.base, "shutdown")).send().await {
            Ok(response) => {
                debug!(
                    target = "visitor::gateway::client",
                    status = response.status().as_u16(),
                    "gateway acknowledged shutdown"
                );
                Ok(())
            }
            Err(err) if err.is_connect() => Err(transport_error(err)),
            Err(err) => {
                debug!(
                    target = "visitor::gateway::client",
                    error = %err,
                    "gateway dropped the connection while shutting down"
                );
                Ok(())
            }
        }
    }

    async fn post_render(&self, request: &RenderRequest) -> Result<String, RenderGatewayError> {
        let response = self
            .http
            .post(endpoint(&self.base, "render"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(RenderGatewayError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }
        if body.trim().is_empty() {
            return Err(RenderGatewayError::EmptyBody);
        }
        Ok(body)
    }
}

#[async_trait]
impl RenderGateway for GatewayClient {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderGatewayError> {
        if !self.enabled {
            return Err(RenderGatewayError::Disabled);
        }
        if !tokio::fs::try_exists(&self.bundle).await.unwrap_or(false) {
            return Err(RenderGatewayError::BundleMissing {
                path: self.bundle.clone(),
            });
        }

        counter!("visitor_gateway_render_total").increment(1);
        let started = Instant::now();
        let result = self.post_render(request).await;
        histogram!("visitor_gateway_render_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = &result {
            counter!("visitor_gateway_render_failed_total").increment(1);
            warn!(
                target = "visitor::gateway::client",
                location = %request.visit.location,
                error = %err,
                "render gateway call failed"
            );
        }

        result
    }
}

/// `base` with `segment` appended to its path.
fn endpoint(base: &Url, segment: &str) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(segment);
    }
    url
}

fn transport_error(err: reqwest::Error) -> RenderGatewayError {
    RenderGatewayError::Transport {
        message: err.to_string(),
    }
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body;
    }
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_to_base_path() {
        let root = Url::parse("http://127.0.0.1:2137").expect("url");
        assert_eq!(endpoint(&root, "render").as_str(), "http://127.0.0.1:2137/render");

        let nested = Url::parse("http://renderer.internal/ssr/").expect("url");
        assert_eq!(
            endpoint(&nested, "health").as_str(),
            "http://renderer.internal/ssr/health"
        );
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(MAX_ERROR_BODY_CHARS * 2);
        assert_eq!(truncate(body).len(), MAX_ERROR_BODY_CHARS);
    }
}
