use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use super::is_protocol_request;
use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request facts shared by the logging layers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Whether the request asked for visit data instead of a document.
    pub protocol: bool,
}

/// Assign a request id and echo it on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
        protocol: is_protocol_request(request.headers()),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Log failed responses together with the [`ErrorReport`] the handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ctx = request.extensions().get::<RequestContext>().cloned();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let failure = Failure {
        status,
        method: method.as_str(),
        path: &path,
        elapsed_ms: started.elapsed().as_millis(),
        request_id: ctx.as_ref().map(|ctx| ctx.request_id.as_str()).unwrap_or(""),
        protocol: ctx.as_ref().is_some_and(|ctx| ctx.protocol),
        report: report.as_ref(),
    };
    failure.log();

    response
}

struct Failure<'a> {
    status: StatusCode,
    method: &'a str,
    path: &'a str,
    elapsed_ms: u128,
    request_id: &'a str,
    protocol: bool,
    report: Option<&'a ErrorReport>,
}

impl Failure<'_> {
    fn log(&self) {
        let source = self.report.map(|report| report.source).unwrap_or("unknown");
        let chain: &[String] = self.report.map(|report| report.messages.as_slice()).unwrap_or(&[]);
        let detail = chain
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available");

        if self.status.is_server_error() {
            error!(
                target = "visitor::http::response",
                status = self.status.as_u16(),
                method = self.method,
                path = self.path,
                elapsed_ms = self.elapsed_ms,
                protocol = self.protocol,
                request_id = self.request_id,
                source,
                detail,
                chain = ?chain,
                "request failed",
            );
        } else {
            warn!(
                target = "visitor::http::response",
                status = self.status.as_u16(),
                method = self.method,
                path = self.path,
                elapsed_ms = self.elapsed_ms,
                protocol = self.protocol,
                request_id = self.request_id,
                source,
                detail,
                "client request error",
            );
        }
    }
}
