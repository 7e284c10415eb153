//! Render orchestration.
//!
//! A [`Visitor`] is built per request by the handler, configured with a render mode,
//! props and shared state, and turned into a response by [`Visitor::respond`]. Protocol
//! requests get the visit as JSON; full page loads get the root document with the
//! bootstrap payload and, depending on the mode, server-rendered HTML.

mod props;

use std::{future::Future, sync::Arc};

use axum::{
    Json,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{LOCATION, VARY},
    },
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::debug;
use visitor_types::{
    PARTIAL_HEADER, Props, Redirect, RenderRequest, Session, VISITOR_HEADER, Visit,
};

use crate::{
    application::{
        error::AppError,
        globals::GlobalsProvider,
        render::RenderGateway,
        session::{Guard, SessionResolver, resolve_session},
        version::AssetVersion,
    },
    cache::{CacheKey, VisitCache},
    config::AppSettings,
    presentation::views::{DocumentContext, render_root_document},
};

pub use props::{COMPONENT_PROP, deep_merge, set_path};
use props::PropsSource;

/// How the HTML of a full page load is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// No server HTML; the client renders from the bootstrap payload.
    Client,
    /// Rendered by the gateway on every full page load.
    Server,
    /// Rendered once per cache key in production, then served from cache.
    Static,
}

/// Collaborators the orchestrator delegates to.
pub struct VisitorServices {
    pub cache: VisitCache,
    pub gateway: Arc<dyn RenderGateway>,
    pub globals: Arc<dyn GlobalsProvider>,
    pub sessions: Arc<dyn SessionResolver>,
}

struct Inner {
    app: AppSettings,
    ssr_enabled: bool,
    version: AssetVersion,
    services: VisitorServices,
}

/// Process-wide orchestrator state, cloned into every request.
#[derive(Clone)]
pub struct VisitorState {
    inner: Arc<Inner>,
}

impl VisitorState {
    pub fn new(
        app: AppSettings,
        ssr_enabled: bool,
        version: AssetVersion,
        services: VisitorServices,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                app,
                ssr_enabled,
                version,
                services,
            }),
        }
    }

    pub fn cache(&self) -> &VisitCache {
        &self.inner.services.cache
    }

    pub fn version(&self) -> &AssetVersion {
        &self.inner.version
    }

    /// Start building the response to one request.
    pub fn visitor(&self, request: RequestFacts) -> Visitor {
        Visitor {
            state: self.clone(),
            request,
            mode: RenderMode::Client,
            view: None,
            props: PropsSource::default(),
            overlay: None,
            shared: Props::new(),
            redirect: None,
            cache_key: None,
            guard: Guard::Default,
        }
    }
}

/// What the orchestrator needs to know about the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    /// Full request URL.
    pub location: String,
    pub query: Props,
    /// Whether the request carries the protocol marker header.
    pub is_protocol: bool,
    pub referer: Option<String>,
    pub headers: HeaderMap,
}

/// Per-request visit builder.
#[must_use = "a visitor does nothing until `respond` is awaited"]
pub struct Visitor {
    state: VisitorState,
    request: RequestFacts,
    mode: RenderMode,
    view: Option<String>,
    props: PropsSource,
    overlay: Option<Props>,
    shared: Props,
    redirect: Option<Redirect>,
    cache_key: Option<CacheKey>,
    guard: Guard,
}

impl Visitor {
    pub fn render_client(mut self, view: impl Into<String>, props: Props) -> Self {
        self.mode = RenderMode::Client;
        self.view = Some(view.into());
        self.props = PropsSource::Ready(props);
        self
    }

    /// Render on every full page load. Falls back to client mode when SSR is disabled.
    pub fn render_server(mut self, view: impl Into<String>, props: Props) -> Self {
        if !self.state.inner.ssr_enabled {
            return self.render_client(view, props);
        }
        self.mode = RenderMode::Server;
        self.view = Some(view.into());
        self.props = PropsSource::Ready(props);
        self
    }

    /// Render once per cache key. `factory` only runs when the data cache misses.
    pub fn render_static<F, Fut>(mut self, view: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Props, AppError>> + Send + 'static,
    {
        self.mode = if self.state.inner.ssr_enabled {
            RenderMode::Static
        } else {
            RenderMode::Client
        };
        self.view = Some(view.into());
        self.props = PropsSource::lazy(factory);
        self
    }

    /// Like [`Visitor::render_static`], with the view named by the `component` prop.
    pub fn render_static_lazy<F, Fut>(self, factory: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Props, AppError>> + Send + 'static,
    {
        let mut visitor = self.render_static(String::new(), factory);
        visitor.view = None;
        visitor
    }

    /// Deep-merge `props` into the visit and answer as a partial update.
    pub fn partial(mut self, props: Props) -> Self {
        let overlay = match self.overlay.take() {
            Some(mut existing) => {
                deep_merge(&mut existing, props);
                existing
            }
            None => props,
        };
        self.overlay = Some(overlay);
        self
    }

    /// Share one value; dotted keys address nested objects.
    pub fn share(mut self, key: &str, value: impl Into<Value>) -> Self {
        set_path(&mut self.shared, key, value.into());
        self
    }

    pub fn share_map(mut self, values: Props) -> Self {
        visitor_types::merge_shallow(&mut self.shared, &values);
        self
    }

    pub fn redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect = Some(Redirect {
            target: target.into(),
            reload: false,
        });
        self
    }

    /// Redirect with a full document reload on the client.
    pub fn hard_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect = Some(Redirect {
            target: target.into(),
            reload: true,
        });
        self
    }

    /// Redirect to the referring page, or `/` without one.
    pub fn back(self) -> Self {
        let target = self
            .request
            .referer
            .clone()
            .filter(|referer| !referer.is_empty())
            .unwrap_or_else(|| "/".to_string());
        self.redirect(target)
    }

    pub fn cache_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn is_partial(&self) -> bool {
        self.overlay.is_some() || self.redirect.is_some()
    }

    pub async fn respond(self) -> Result<Response, AppError> {
        let partial = self.is_partial();
        let Visitor {
            state,
            request,
            mode,
            view,
            props,
            overlay,
            shared,
            redirect,
            cache_key,
            guard,
        } = self;
        let ctx = &state.inner;
        let services = &ctx.services;
        let key = cache_key.unwrap_or_else(|| CacheKey::new(request.location.clone()));

        if let Some(redirect) = redirect {
            return redirect_response(ctx, &request, &guard, redirect, shared).await;
        }

        let draft = VisitDraft {
            view,
            props,
            overlay,
            partial,
            shared,
            query: request.query.clone(),
            location: request.location.clone(),
            version: ctx.version.as_str().to_string(),
        };

        let production = ctx.app.is_production();
        let use_data_cache =
            mode == RenderMode::Static && production && !request.is_protocol && !partial;

        let visit = if use_data_cache {
            services
                .cache
                .data()
                .get_or_compute(&key, move || draft.build())
                .await?
        } else {
            draft.build().await?
        };

        let session = resolve_session(services.sessions.as_ref(), &request.headers, &guard).await?;

        if request.is_protocol {
            let visit = Visit { session, ..visit };
            return Ok(visit_response(&visit, partial));
        }

        let render_request = RenderRequest {
            visit,
            globals: services.globals.globals(),
        };

        let html = match mode {
            RenderMode::Client => String::new(),
            RenderMode::Static if production => {
                let gateway = services.gateway.as_ref();
                let payload = &render_request;
                services
                    .cache
                    .rendered()
                    .get_or_compute(&key, move || async move {
                        gateway.render(payload).await.map_err(AppError::from)
                    })
                    .await?
            }
            RenderMode::Server | RenderMode::Static => {
                services.gateway.render(&render_request).await?
            }
        };

        let RenderRequest { visit, globals } = render_request;
        let visit = Visit { session, ..visit };

        debug!(
            target = "visitor::orchestrator",
            location = %visit.location,
            mode = ?mode,
            rendered_bytes = html.len(),
            "answering full page load"
        );

        let document = render_root_document(&DocumentContext {
            app: &ctx.app,
            visit: &visit,
            globals: &globals,
            html: &html,
        })?;

        let mut response = document.into_response();
        response
            .headers_mut()
            .insert(VARY, HeaderValue::from_static(VISITOR_HEADER));
        Ok(response)
    }
}

/// Everything needed to build the anonymous visit, possibly inside a cache fill.
struct VisitDraft {
    view: Option<String>,
    props: PropsSource,
    overlay: Option<Props>,
    partial: bool,
    shared: Props,
    query: Props,
    location: String,
    version: String,
}

impl VisitDraft {
    async fn build(self) -> Result<Visit, AppError> {
        let mut props = self.props.resolve().await?;
        if let Some(overlay) = self.overlay {
            deep_merge(&mut props, overlay);
        }

        let view = props
            .get(COMPONENT_PROP)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(self.view)
            .filter(|view| !view.is_empty());

        if view.is_none() && !self.partial {
            return Err(AppError::configuration(format!(
                "no view was provided for `{}`; pass one or set the `{COMPONENT_PROP}` prop",
                self.location
            )));
        }

        Ok(Visit {
            redirect: None,
            query: self.query,
            session: Session::anonymous(),
            location: self.location,
            view,
            shared: self.shared,
            props,
            version: self.version,
        })
    }
}

async fn redirect_response(
    ctx: &Inner,
    request: &RequestFacts,
    guard: &Guard,
    redirect: Redirect,
    shared: Props,
) -> Result<Response, AppError> {
    if !request.is_protocol {
        debug!(
            target = "visitor::orchestrator",
            target_url = %redirect.target,
            "redirecting plain request"
        );
        return Ok((StatusCode::FOUND, [(LOCATION, redirect.target)]).into_response());
    }

    let session =
        resolve_session(ctx.services.sessions.as_ref(), &request.headers, guard).await?;
    let visit = Visit {
        redirect: Some(redirect),
        query: request.query.clone(),
        session,
        location: request.location.clone(),
        view: None,
        shared,
        props: Props::new(),
        version: ctx.version.as_str().to_string(),
    };
    Ok(visit_response(&visit, true))
}

fn visit_response(visit: &Visit, partial: bool) -> Response {
    let mut response = Json(visit).into_response();
    let headers = response.headers_mut();
    let marker = HeaderValue::from_static("true");
    headers.insert(HeaderName::from_static(VISITOR_HEADER), marker.clone());
    if partial {
        headers.insert(HeaderName::from_static(PARTIAL_HEADER), marker);
    }
    headers.insert(VARY, HeaderValue::from_static(VISITOR_HEADER));
    response
}
