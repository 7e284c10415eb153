//! Client navigation engine.
//!
//! Turns navigations (link clicks, programmatic visits, back/forward) into state,
//! history, head and view updates. Only the most recent dispatch may commit: each one
//! aborts its predecessor, and a completion that arrives after a newer dispatch started
//! is dropped without touching state or emitting signals.

use std::{
    convert::Infallible,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::{self, BoxFuture};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use visitor_types::{
    Bootstrap, CurrentView, NavigationSnapshot, NavigationState, Props, Redirect, Visit,
    XSRF_COOKIE, merge_shallow,
};

use super::{
    events::LifecycleEvent,
    head::apply_head,
    host::Host,
    transport::{
        Method, Transport, TransportError, VisitEnvelope, VisitRequest, decode_cookie_value,
    },
};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "client::navigator";
const EVENT_CAPACITY: usize = 64;
/// Redirect hops followed before a dispatch gives up.
pub const MAX_REDIRECTS: usize = 20;
/// `in_flight` value while no exchange is awaiting a reply.
const IDLE: u64 = 0;

#[derive(Debug, Error)]
pub enum NavigationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("visit for `{location}` has no view")]
    MissingView { location: String },
    #[error("bootstrap payload is invalid: {0}")]
    Bootstrap(String),
    #[error("gave up on `{location}` after {MAX_REDIRECTS} redirects")]
    TooManyRedirects { location: String },
}

/// One navigation intent.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    /// Replace the current history entry instead of pushing one.
    pub replace: bool,
}

impl DispatchOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            replace: false,
        }
    }

    pub fn with_method(method: Method, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            replace: false,
        }
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The visit was committed; carries the resulting state.
    Committed(NavigationState),
    /// A newer dispatch took over before this one completed.
    Superseded,
}

pub struct Navigator<T, H> {
    transport: T,
    host: H,
    state: Mutex<NavigationState>,
    globals: Props,
    generation: AtomicU64,
    /// Generation of the exchange awaiting a reply, or [`IDLE`].
    in_flight: AtomicU64,
    events: broadcast::Sender<LifecycleEvent>,
}

impl<T, H> Navigator<T, H>
where
    T: Transport,
    H: Host,
{
    /// Start from the payload embedded in the root document.
    ///
    /// The initial history entry is replaced with the initial state so back navigation to
    /// it can be restored without a request.
    pub fn new(transport: T, host: H, bootstrap: Bootstrap) -> Result<Self, NavigationError> {
        let Bootstrap { visit, globals } = bootstrap;
        let view = visit
            .view
            .clone()
            .ok_or_else(|| NavigationError::MissingView {
                location: visit.location.clone(),
            })?;
        let state = full_state(visit, view, Props::new());

        host.replace_state(snapshot_of(&state), &state.location);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            transport,
            host,
            state: Mutex::new(state),
            globals,
            generation: AtomicU64::new(0),
            in_flight: AtomicU64::new(IDLE),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> NavigationState {
        mutex_lock(&self.state, SOURCE, "state").clone()
    }

    pub fn globals(&self) -> &Props {
        &self.globals
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn visit(&self, url: impl Into<String>) -> Result<Outcome, NavigationError> {
        self.dispatch(DispatchOptions::get(url)).await
    }

    /// Re-request the current location, replacing its history entry.
    pub async fn refresh(&self) -> Result<Outcome, NavigationError> {
        let location = self.state().location;
        self.dispatch(DispatchOptions::get(location).replace(true))
            .await
    }

    pub async fn dispatch(&self, options: DispatchOptions) -> Result<Outcome, NavigationError> {
        self.dispatch_hop(options, 0).await
    }

    fn dispatch_hop(
        &self,
        options: DispatchOptions,
        hops: usize,
    ) -> BoxFuture<'_, Result<Outcome, NavigationError>> {
        Box::pin(async move {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.transport.abort();
            self.in_flight.store(generation, Ordering::SeqCst);
            self.emit(LifecycleEvent::Start {
                method: options.method,
                url: options.url.clone(),
            });

            let request = VisitRequest {
                method: options.method,
                url: options.url.clone(),
                body: options.body,
                xsrf_token: self
                    .host
                    .cookie(XSRF_COOKIE)
                    .map(|raw| decode_cookie_value(&raw)),
            };
            let result = self.transport.send(request).await;
            let _ = self.in_flight.compare_exchange(
                generation,
                IDLE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );

            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(
                    target = "visitor::client::navigator",
                    url = %options.url,
                    "dispatch superseded"
                );
                return Ok(Outcome::Superseded);
            }

            match result {
                Ok(VisitEnvelope::Full(visit)) => {
                    self.handle_full(visit, options.replace, hops).await
                }
                Ok(VisitEnvelope::Partial(visit)) => {
                    self.handle_partial(visit, options.method, hops).await
                }
                Err(TransportError::Aborted) => {
                    debug!(
                        target = "visitor::client::navigator",
                        url = %options.url,
                        "exchange aborted"
                    );
                    self.emit(LifecycleEvent::Done);
                    Ok(Outcome::Superseded)
                }
                Err(err) => Err(self.fail(err.into())),
            }
        })
    }

    /// React to a history traversal.
    ///
    /// A valid stored snapshot is restored without a request. Otherwise the current entry is
    /// overwritten with the last known state. A cancelled in-flight dispatch gets its `done`
    /// here.
    pub fn restore(&self, entry: Option<&Value>) -> Option<NavigationState> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transport.abort();
        if self.in_flight.swap(IDLE, Ordering::SeqCst) != IDLE {
            self.emit(LifecycleEvent::Done);
        }

        match entry.and_then(NavigationSnapshot::restore) {
            Some(state) => {
                *mutex_lock(&self.state, SOURCE, "restore") = state.clone();
                self.host.scroll_to(0, 0);
                if let Some(meta) = state.meta() {
                    apply_head(&self.host, &meta);
                }
                self.host.mount(&state);
                Some(state)
            }
            None => {
                let state = self.state();
                self.host
                    .replace_state(snapshot_of(&state), &state.location);
                None
            }
        }
    }

    async fn handle_full(
        &self,
        visit: Visit,
        replace: bool,
        hops: usize,
    ) -> Result<Outcome, NavigationError> {
        if let Some(redirect) = visit.redirect.clone() {
            return self.follow(redirect, hops).await;
        }

        let Some(view) = visit.view.clone() else {
            return Err(self.fail(NavigationError::MissingView {
                location: visit.location,
            }));
        };

        let state = {
            let mut current = mutex_lock(&self.state, SOURCE, "commit_full");
            let shared = std::mem::take(&mut current.shared);
            *current = full_state(visit, view, shared);
            current.clone()
        };

        Ok(self.commit(state, replace))
    }

    async fn handle_partial(
        &self,
        mut visit: Visit,
        method: Method,
        hops: usize,
    ) -> Result<Outcome, NavigationError> {
        let redirect = visit.redirect.take();

        let state = {
            let mut current = mutex_lock(&self.state, SOURCE, "commit_partial");
            merge_partial(&mut current, visit, method == Method::Get);
            current.clone()
        };

        match redirect {
            Some(redirect) => self.follow(redirect, hops).await,
            None => Ok(self.commit(state, true)),
        }
    }

    async fn follow(&self, redirect: Redirect, hops: usize) -> Result<Outcome, NavigationError> {
        if hops >= MAX_REDIRECTS {
            return Err(self.fail(NavigationError::TooManyRedirects {
                location: redirect.target,
            }));
        }
        self.emit(LifecycleEvent::Done);

        if redirect.reload {
            info!(
                target = "visitor::client::navigator",
                target_url = %redirect.target,
                "hard redirect"
            );
            self.host.assign_location(&redirect.target);
            let never: Infallible = future::pending().await;
            match never {}
        }

        self.dispatch_hop(DispatchOptions::get(redirect.target), hops + 1)
            .await
    }

    fn commit(&self, state: NavigationState, replace: bool) -> Outcome {
        self.host.scroll_to(0, 0);
        if let Some(meta) = state.meta() {
            apply_head(&self.host, &meta);
        }

        let snapshot = snapshot_of(&state);
        if replace {
            self.host.replace_state(snapshot, &state.location);
        } else {
            self.host.push_state(snapshot, &state.location);
        }

        self.host.mount(&state);
        self.emit(LifecycleEvent::Done);
        Outcome::Committed(state)
    }

    fn fail(&self, err: NavigationError) -> NavigationError {
        self.emit(LifecycleEvent::Error {
            message: err.to_string(),
        });
        self.emit(LifecycleEvent::Done);
        err
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }
}

fn snapshot_of(state: &NavigationState) -> Value {
    NavigationSnapshot::new(state.clone()).to_value()
}

/// State after a full visit: everything replaced except `shared`, which is merged.
fn full_state(visit: Visit, view: String, mut shared: Props) -> NavigationState {
    merge_shallow(&mut shared, &visit.shared);
    NavigationState {
        location: visit.location,
        session: visit.session,
        shared,
        current: CurrentView {
            view,
            props: visit.props,
        },
        query: visit.query,
        version: visit.version,
    }
}

/// Partial visit: keep the view, merge props and shared, replace the rest.
///
/// Answers to mutating requests keep the current location, so the history entry stays
/// reachable with a GET.
fn merge_partial(state: &mut NavigationState, visit: Visit, take_location: bool) {
    merge_shallow(&mut state.current.props, &visit.props);
    merge_shallow(&mut state.shared, &visit.shared);
    if take_location {
        state.location = visit.location;
    }
    state.session = visit.session;
    state.query = visit.query;
    state.version = visit.version;
}
