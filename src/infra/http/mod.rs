//! HTTP glue: the [`Visitor`] extractor and request logging layers.

mod middleware;

use std::convert::Infallible;

use axum::{
    Router,
    extract::{FromRef, FromRequestParts},
    http::{
        HeaderMap,
        header::{HOST, REFERER},
        request::Parts,
    },
    middleware as axum_middleware,
};
use serde_json::Value;
use visitor_types::{Props, VISITOR_HEADER};

use crate::application::visit::{RequestFacts, Visitor, VisitorState};

pub use middleware::{REQUEST_ID_HEADER, RequestContext, log_responses, set_request_context};

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Attach request ids and error logging to `router`.
pub fn instrument<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

impl<S> FromRequestParts<S> for Visitor
where
    VisitorState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = VisitorState::from_ref(state);
        Ok(state.visitor(request_facts(parts)))
    }
}

/// Collect what the orchestrator needs from the request head.
pub fn request_facts(parts: &Parts) -> RequestFacts {
    RequestFacts {
        location: full_url(parts),
        query: query_props(parts.uri.query()),
        is_protocol: is_protocol_request(&parts.headers),
        referer: header_str(&parts.headers, REFERER.as_str()).map(str::to_string),
        headers: parts.headers.clone(),
    }
}

pub fn is_protocol_request(headers: &HeaderMap) -> bool {
    header_str(headers, VISITOR_HEADER)
        .map(|value| !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0"))
        .unwrap_or(false)
}

fn full_url(parts: &Parts) -> String {
    let uri = &parts.uri;
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }

    let scheme = header_str(&parts.headers, FORWARDED_PROTO_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = header_str(&parts.headers, HOST.as_str())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");
    let path = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");

    format!("{scheme}://{host}{path}")
}

/// Decode the query string. Repeated keys and `key[]` keys collect into arrays.
fn query_props(query: Option<&str>) -> Props {
    let mut props = Props::new();
    let Some(query) = query else {
        return props;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = Value::String(value.into_owned());
        let (name, listed) = match key.strip_suffix("[]") {
            Some(name) => (name.to_string(), true),
            None => (key.to_string(), false),
        };

        match props.get_mut(&name) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None if listed => {
                props.insert(name, Value::Array(vec![value]));
            }
            None => {
                props.insert(name, value);
            }
        }
    }
    props
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
