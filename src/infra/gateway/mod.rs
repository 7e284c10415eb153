//! Render gateway: HTTP client used by the orchestrator and the server it talks to.
//!
//! Surface: `GET /health`, `POST /shutdown`, `POST /render` (body `{visit, globals}`,
//! answer HTML), and a `404` JSON answer for anything else.

mod client;
mod server;
mod shell;

pub use client::{GatewayClient, GatewayHealth};
pub use server::{
    GatewayState, Renderer, RendererError, build_gateway_router, serve_gateway,
};
pub use shell::ShellRenderer;
