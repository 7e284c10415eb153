//! One visit exchange at a time over HTTP.

use std::{fmt, sync::Mutex};

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable};
use reqwest::{
    StatusCode,
    header::{ACCEPT, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;
use visitor_types::{PARTIAL_HEADER, VISITOR_HEADER, Visit, XSRF_HEADER};

use crate::util::lock::mutex_lock;

const SOURCE: &str = "client::transport";
const REQUESTED_WITH_HEADER: &str = "x-requested-with";
const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Methods that carry the anti-CSRF header.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    fn as_http(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    /// Decoded value of the anti-CSRF cookie, if the host has one.
    pub xsrf_token: Option<String>,
}

/// Classified successful answer.
#[derive(Debug, Clone, PartialEq)]
pub enum VisitEnvelope {
    Full(Visit),
    Partial(Visit),
}

impl VisitEnvelope {
    pub fn visit(&self) -> &Visit {
        match self {
            VisitEnvelope::Full(visit) | VisitEnvelope::Partial(visit) => visit,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, VisitEnvelope::Partial(_))
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network failure: {message}")]
    Network { message: String },
    #[error("server answered {status}: {message}")]
    Protocol { status: u16, message: String },
    #[error("malformed visit response (status {status}): {message}")]
    Malformed { status: u16, message: String },
    /// The exchange was superseded or aborted before it completed.
    #[error("exchange aborted")]
    Aborted,
}

/// Issues visit exchanges. Starting a new one supersedes the previous one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: VisitRequest) -> Result<VisitEnvelope, TransportError>;

    /// Abort the in-flight exchange; a no-op when nothing is in flight.
    fn abort(&self);
}

/// Classify a response by status and protocol markers.
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<VisitEnvelope, TransportError> {
    if status.is_client_error() || status.is_server_error() {
        return Err(TransportError::Protocol {
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("error").to_string(),
        });
    }

    if !status.is_success() || !has_marker(headers, VISITOR_HEADER) {
        return Err(TransportError::Malformed {
            status: status.as_u16(),
            message: "response is not a visit".to_string(),
        });
    }

    let visit: Visit = serde_json::from_slice(body).map_err(|err| TransportError::Malformed {
        status: status.as_u16(),
        message: format!("visit payload could not be decoded: {err}"),
    })?;

    if has_marker(headers, PARTIAL_HEADER) {
        Ok(VisitEnvelope::Partial(visit))
    } else {
        Ok(VisitEnvelope::Full(visit))
    }
}

/// URL-decode a raw cookie value.
pub fn decode_cookie_value(raw: &str) -> String {
    let escaped = format!("v={}", raw.replace('+', "%2B"));
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

fn has_marker(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            let value = value.trim();
            !value.is_empty() && !value.eq_ignore_ascii_case("false")
        })
        .unwrap_or(false)
}

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    http: reqwest::Client,
    base: Url,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl HttpTransport {
    /// Relative visit URLs are resolved against `base`.
    pub fn new(base: Url) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| TransportError::Network {
                message: format!("failed to build http client: {err}"),
            })?;
        Ok(Self::with_client(http, base))
    }

    pub fn with_client(http: reqwest::Client, base: Url) -> Self {
        Self {
            http,
            base,
            in_flight: Mutex::new(None),
        }
    }

    async fn exchange(&self, request: VisitRequest) -> Result<VisitEnvelope, TransportError> {
        let url = self
            .base
            .join(&request.url)
            .map_err(|err| TransportError::Network {
                message: format!("invalid visit url `{}`: {err}", request.url),
            })?;

        let mut builder = self
            .http
            .request(request.method.as_http(), url)
            .headers(protocol_headers(&request));
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|err| TransportError::Network {
            message: err.to_string(),
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Network {
                message: err.to_string(),
            })?;

        classify(status, &headers, &body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: VisitRequest) -> Result<VisitEnvelope, TransportError> {
        let (handle, registration) = AbortHandle::new_pair();
        if let Some(previous) = mutex_lock(&self.in_flight, SOURCE, "send").replace(handle) {
            previous.abort();
        }

        debug!(
            target = "visitor::client::transport",
            method = %request.method,
            url = %request.url,
            "sending visit request"
        );

        match Abortable::new(self.exchange(request), registration).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Aborted),
        }
    }

    fn abort(&self) {
        if let Some(handle) = mutex_lock(&self.in_flight, SOURCE, "abort").take() {
            handle.abort();
        }
    }
}

fn protocol_headers(request: &VisitRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(VISITOR_HEADER),
        HeaderValue::from_static("true"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static(REQUESTED_WITH_HEADER),
        HeaderValue::from_static(REQUESTED_WITH_VALUE),
    );

    if request.method.is_mutating()
        && let Some(token) = request.xsrf_token.as_deref()
        && let Ok(value) = HeaderValue::from_str(token)
    {
        headers.insert(HeaderName::from_static(XSRF_HEADER), value);
    }

    headers
}
