use std::{future::IntoFuture, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{any, get, post},
};
use serde_json::{Value, json};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    net::TcpListener,
    sync::{Mutex as AsyncMutex, Notify},
};
use tracing::{info, warn};
use visitor_types::RenderRequest;

use crate::{
    application::error::{ErrorReport, HttpError},
    infra::{error::InfraError, http::instrument},
};

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RendererError {
    message: String,
}

impl RendererError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns a render request into HTML inside the gateway process.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<String, RendererError>;
}

#[derive(Clone)]
pub struct GatewayState {
    renderer: Arc<dyn Renderer>,
    render_lock: Arc<AsyncMutex<()>>,
    shutdown: Arc<Notify>,
}

impl GatewayState {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            render_lock: Arc::new(AsyncMutex::new(())),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Notified when `/shutdown` is called.
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }
}

pub fn build_gateway_router(state: GatewayState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/shutdown", get(shutdown).post(shutdown))
        .route("/render", post(render))
        .route("/404", any(not_found))
        .fallback(not_found)
        .with_state(state);

    instrument(router)
}

/// Serve the gateway until `/shutdown` is called or the process is interrupted.
///
/// In-flight requests get `graceful` to finish once shutdown starts.
pub async fn serve_gateway(
    listener: TcpListener,
    state: GatewayState,
    graceful: Duration,
) -> Result<(), InfraError> {
    let addr = listener.local_addr()?;
    let requested = state.shutdown_signal();
    let draining = Arc::new(Notify::new());

    let signal = {
        let draining = draining.clone();
        async move {
            tokio::select! {
                _ = requested.notified() => {
                    info!(target = "visitor::gateway::server", "shutdown requested");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(target = "visitor::gateway::server", "interrupt received");
                }
            }
            draining.notify_one();
        }
    };

    info!(
        target = "visitor::gateway::server",
        addr = %addr,
        "render gateway listening"
    );

    let server = axum::serve(listener, build_gateway_router(state))
        .with_graceful_shutdown(signal)
        .into_future();

    tokio::select! {
        result = server => result.map_err(InfraError::from),
        _ = async {
            draining.notified().await;
            tokio::time::sleep(graceful).await;
        } => {
            warn!(
                target = "visitor::gateway::server",
                graceful_secs = graceful.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK", "timestamp": now_millis() }))
}

async fn shutdown(State(state): State<GatewayState>) -> Json<Value> {
    state.shutdown.notify_one();
    Json(json!({ "status": "SHUTTING_DOWN", "timestamp": now_millis() }))
}

async fn render(
    State(state): State<GatewayState>,
    Json(request): Json<RenderRequest>,
) -> Result<Html<String>, HttpError> {
    let _turn = state.render_lock.lock().await;
    state.renderer.render(request).await.map(Html).map_err(|err| {
        HttpError::from_error(
            "infra::gateway::server::render",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Rendering failed",
            &err,
        )
    })
}

async fn not_found() -> Response {
    let mut response = (
        StatusCode::NOT_FOUND,
        Json(json!({ "status": "NOT_FOUND", "timestamp": now_millis() })),
    )
        .into_response();
    ErrorReport::from_message(
        "infra::gateway::server::not_found",
        StatusCode::NOT_FOUND,
        "unknown gateway route",
    )
    .attach(&mut response);
    response
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
