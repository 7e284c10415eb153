use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Path,
    http::{HeaderMap, Request, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use visitor::{
    application::{
        error::AppError,
        globals::StaticGlobals,
        render::{RenderGateway, RenderGatewayError},
        session::{Guard, SessionResolver},
        version::AssetVersion,
        visit::{Visitor, VisitorServices, VisitorState},
    },
    cache::{CacheKey, VisitCache},
    client::extract_bootstrap,
    config::AppSettings,
    infra::http::instrument,
};
use visitor_types::{Props, RenderRequest, Session, Visit};

#[derive(Default)]
struct RecordingGateway {
    requests: Mutex<Vec<RenderRequest>>,
}

impl RecordingGateway {
    fn calls(&self) -> usize {
        self.requests.lock().expect("requests").len()
    }

    fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

#[async_trait]
impl RenderGateway for RecordingGateway {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderGatewayError> {
        self.requests
            .lock()
            .expect("requests")
            .push(request.clone());
        match request.visit.view.as_deref() {
            Some("Broken") => Err(RenderGatewayError::Status {
                status: 500,
                body: "render failed".to_string(),
            }),
            Some(view) => Ok(format!("<main data-view=\"{view}\">rendered</main>")),
            None => Err(RenderGatewayError::EmptyBody),
        }
    }
}

/// Authenticates callers sending `x-user`.
struct HeaderSessions;

#[async_trait]
impl SessionResolver for HeaderSessions {
    async fn resolve(&self, headers: &HeaderMap, _guard: &Guard) -> Result<Session, AppError> {
        Ok(match headers.get("x-user").and_then(|v| v.to_str().ok()) {
            Some(name) => Session::authenticated(json!({ "name": name }), false),
            None => Session::anonymous(),
        })
    }
}

struct Harness {
    state: VisitorState,
    gateway: Arc<RecordingGateway>,
    factory_calls: Arc<AtomicUsize>,
}

fn harness(environment: &str) -> Harness {
    let gateway = Arc::new(RecordingGateway::default());
    let globals: Props =
        serde_json::from_value(json!({ "routes": { "home": "/" } })).expect("globals");
    let state = VisitorState::new(
        AppSettings {
            environment: environment.to_string(),
            manifest: "public/build/manifest.json".into(),
            root_id: "app".to_string(),
            lang: "en".to_string(),
            entry_scripts: vec!["/build/app.js".to_string()],
        },
        true,
        AssetVersion::new("abc123"),
        VisitorServices {
            cache: VisitCache::in_memory(),
            gateway: gateway.clone(),
            globals: Arc::new(StaticGlobals::new(globals)),
            sessions: Arc::new(HeaderSessions),
        },
    );

    Harness {
        state,
        gateway,
        factory_calls: Arc::new(AtomicUsize::new(0)),
    }
}

fn props(value: Value) -> Props {
    serde_json::from_value(value).expect("props")
}

fn router(harness: &Harness) -> Router {
    let calls = harness.factory_calls.clone();
    let static_post = move |Path(id): Path<u64>, visitor: Visitor| {
        let calls = calls.clone();
        async move {
            visitor
                .render_static("Post", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(props(json!({ "id": id, "title": format!("Post {id}") })))
                })
                .cache_key(format!("post:{id}"))
                .respond()
                .await
        }
    };

    let routes = Router::new()
        .route("/posts/{id}", get(static_post))
        .route("/", get(home))
        .route("/dashboard", get(dashboard))
        .route("/broken", get(broken))
        .route("/nameless", get(nameless))
        .route("/posts/{id}/like", post(like))
        .route("/posts/{id}/back", post(back))
        .route("/sso", get(sso))
        .with_state(harness.state.clone());

    instrument(routes)
}

async fn home(visitor: Visitor) -> Result<Response, AppError> {
    visitor
        .render_client("Home", props(json!({ "greeting": "hi" })))
        .share("app.name", "blog")
        .respond()
        .await
}

async fn dashboard(visitor: Visitor) -> Result<Response, AppError> {
    visitor
        .render_server("Dashboard", props(json!({ "widgets": 3 })))
        .respond()
        .await
}

async fn broken(visitor: Visitor) -> Result<Response, AppError> {
    visitor.render_server("Broken", Props::new()).respond().await
}

async fn nameless(visitor: Visitor) -> Result<Response, AppError> {
    visitor.render_client("", Props::new()).respond().await
}

async fn like(Path(id): Path<u64>, visitor: Visitor) -> Result<Response, AppError> {
    visitor
        .render_client("Post", props(json!({ "id": id, "post": { "likes": 10 } })))
        .partial(props(json!({ "post": { "liked": true } })))
        .respond()
        .await
}

async fn back(visitor: Visitor) -> Result<Response, AppError> {
    visitor.share("notice", "deleted").back().respond().await
}

async fn sso(visitor: Visitor) -> Result<Response, AppError> {
    visitor
        .hard_redirect("https://sso.example.com/login")
        .respond()
        .await
}

fn page(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "blog.test")
        .body(Body::empty())
        .expect("request")
}

fn protocol(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "blog.test")
        .header("x-visitor", "true")
        .header(header::REFERER, "http://blog.test/posts/1")
        .body(Body::empty())
        .expect("request")
}

fn with_user(mut request: Request<Body>, name: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-user", name.parse().expect("header value"));
    request
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (
        status,
        headers,
        String::from_utf8(body.to_vec()).expect("utf-8 body"),
    )
}

#[tokio::test]
async fn static_page_renders_once_per_cache_key() {
    let harness = harness("production");
    let router = router(&harness);

    for _ in 0..3 {
        let (status, headers, body) = send(&router, page("/posts/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::VARY).expect("vary"), "x-visitor");
        assert!(body.contains(r#"<main data-view="Post">rendered</main>"#));
    }
    assert_eq!(harness.factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.gateway.calls(), 1);

    let (status, _, _) = send(&router, page("/posts/2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.factory_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.gateway.calls(), 2);
}

#[tokio::test]
async fn static_caches_never_hold_the_caller_session() {
    let harness = harness("production");
    let router = router(&harness);

    let (_, _, body) = send(&router, with_user(page("/posts/1"), "ada")).await;
    let bootstrap = extract_bootstrap(&body).expect("bootstrap");
    assert!(bootstrap.visit.session.is_authenticated);
    assert_eq!(bootstrap.visit.session.user["name"], "ada");
    assert_eq!(bootstrap.globals["routes"]["home"], "/");

    let cached: Visit = harness
        .state
        .cache()
        .data()
        .get(&CacheKey::from("post:1"))
        .await
        .expect("cache read")
        .expect("cached visit");
    assert!(cached.session.is_anonymous());
    assert!(
        harness
            .gateway
            .requests()
            .iter()
            .all(|request| request.visit.session.is_anonymous())
    );

    let (_, _, body) = send(&router, page("/posts/1")).await;
    let bootstrap = extract_bootstrap(&body).expect("bootstrap");
    assert!(bootstrap.visit.session.is_anonymous());
    assert!(!body.contains("ada"));
}

#[tokio::test]
async fn static_page_outside_production_renders_every_time() {
    let harness = harness("local");
    let router = router(&harness);

    send(&router, page("/posts/1")).await;
    send(&router, page("/posts/1")).await;

    assert_eq!(harness.factory_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.gateway.calls(), 2);
}

#[tokio::test]
async fn protocol_request_answers_visit_json() {
    let harness = harness("production");
    let router = router(&harness);

    let (status, headers, body) =
        send(&router, with_user(protocol("GET", "/posts/5?tab=comments"), "ada")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-visitor").expect("marker"), "true");
    assert!(headers.get("x-partial").is_none());
    assert_eq!(headers.get(header::VARY).expect("vary"), "x-visitor");
    assert!(
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"))
    );

    let visit: Visit = serde_json::from_str(&body).expect("visit json");
    assert_eq!(visit.view.as_deref(), Some("Post"));
    assert_eq!(visit.location, "http://blog.test/posts/5?tab=comments");
    assert_eq!(visit.query["tab"], "comments");
    assert_eq!(visit.props["id"], 5);
    assert_eq!(visit.version, "abc123");
    assert!(visit.session.is_authenticated);
    assert!(visit.redirect.is_none());

    assert_eq!(harness.gateway.calls(), 0);
    assert!(
        harness
            .state
            .cache()
            .data()
            .get(&CacheKey::from("post:5"))
            .await
            .expect("cache read")
            .is_none()
    );
}

#[tokio::test]
async fn client_mode_embeds_bootstrap_without_server_html() {
    let harness = harness("production");
    let router = router(&harness);

    let (status, _, body) = send(&router, page("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#"<div id="app"></div>"#));
    assert!(body.contains(r#"<script type="module" src="/build/app.js"></script>"#));
    assert!(body.contains("var routes = "));

    let bootstrap = extract_bootstrap(&body).expect("bootstrap");
    assert_eq!(bootstrap.visit.view.as_deref(), Some("Home"));
    assert_eq!(bootstrap.visit.shared["app"]["name"], "blog");
    assert_eq!(harness.gateway.calls(), 0);
}

#[tokio::test]
async fn server_mode_renders_each_load_through_gateway() {
    let harness = harness("production");
    let router = router(&harness);

    send(&router, page("/dashboard")).await;
    let (_, _, body) = send(&router, page("/dashboard")).await;

    assert!(body.contains(r#"<main data-view="Dashboard">rendered</main>"#));
    assert_eq!(harness.gateway.calls(), 2);
    let request = &harness.gateway.requests()[0];
    assert_eq!(request.globals["routes"]["home"], "/");
    assert_eq!(request.visit.props["widgets"], 3);
}

#[tokio::test]
async fn gateway_failure_is_bad_gateway() {
    let harness = harness("production");
    let router = router(&harness);

    let (status, headers, _) = send(&router, page("/broken")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(headers.get("x-request-id").is_some());
    assert_eq!(harness.gateway.calls(), 1);
}

#[tokio::test]
async fn missing_view_is_a_server_error() {
    let harness = harness("production");
    let router = router(&harness);

    let (status, _, _) = send(&router, page("/nameless")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn partial_answers_merged_props() {
    let harness = harness("production");
    let router = router(&harness);

    let (status, headers, body) = send(&router, protocol("POST", "/posts/1/like")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-partial").expect("partial marker"), "true");

    let visit: Visit = serde_json::from_str(&body).expect("visit json");
    assert_eq!(
        Value::Object(visit.props),
        json!({ "id": 1, "post": { "likes": 10, "liked": true } })
    );
}

#[tokio::test]
async fn redirects_depend_on_request_kind() {
    let harness = harness("production");
    let router = router(&harness);

    let plain = Request::builder()
        .method("POST")
        .uri("/posts/1/back")
        .header(header::HOST, "blog.test")
        .header(header::REFERER, "http://blog.test/posts/1")
        .body(Body::empty())
        .expect("request");
    let (status, headers, _) = send(&router, plain).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(
        headers.get(header::LOCATION).expect("location"),
        "http://blog.test/posts/1"
    );

    let (status, headers, body) = send(&router, protocol("POST", "/posts/1/back")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-partial").expect("partial marker"), "true");
    let visit: Visit = serde_json::from_str(&body).expect("visit json");
    let redirect = visit.redirect.expect("redirect");
    assert_eq!(redirect.target, "http://blog.test/posts/1");
    assert!(!redirect.reload);
    assert_eq!(visit.shared["notice"], "deleted");

    let (_, _, body) = send(&router, protocol("GET", "/sso")).await;
    let visit: Visit = serde_json::from_str(&body).expect("visit json");
    let redirect = visit.redirect.expect("redirect");
    assert_eq!(redirect.target, "https://sso.example.com/login");
    assert!(redirect.reload);
}
