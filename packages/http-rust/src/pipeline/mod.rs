//! The composed request pipeline.
//!
//! A [`Pipeline`] is an ordered list of stages walked front to back for every
//! request:
//!
//! - **Middleware** stages may mutate the request (for example, insert an
//!   extension read by a later stage), answer it, or fail it.
//! - **Mount** stages hand requests under their path prefix to an axum
//!   [`Router`]. When the router has no matching route the request comes back
//!   and the walk continues.
//! - **Catch** stages receive failures from any earlier stage.
//!
//! Stages are appended during composition and read through a lock-free
//! snapshot on every request.

pub mod contribution;
pub mod discovery;

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use tower::ServiceExt;

use crate::dispatch::{self, ErrorDispatcher, RequestInfo};
use crate::error::{ErrorSlot, HttpError};

pub use contribution::{
    apply_contribution, apply_contributions, Contribution, Extension, ExtensionBundle,
    ExtensionQueue,
};
pub use discovery::{list_modules, scan, ModuleLoader, ProviderRegistry};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// What a middleware stage decided.
pub enum Flow {
    /// Continue with the next stage.
    Next,
    /// Stop here and send this response.
    Respond(Response),
}

/// A request-handling stage.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, request: &mut Request) -> Result<Flow, HttpError>;
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request) -> Result<Flow, HttpError> + Send + Sync + 'static,
{
    async fn handle(&self, request: &mut Request) -> Result<Flow, HttpError> {
        (self.0)(request)
    }
}

/// Wraps a synchronous closure as a middleware stage.
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&mut Request) -> Result<Flow, HttpError> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Middleware that inserts a clone of `value` into every request's extensions.
pub fn extension_tag<T>(value: T) -> Arc<dyn Middleware>
where
    T: Clone + Send + Sync + 'static,
{
    middleware_fn(move |request| {
        request.extensions_mut().insert(value.clone());
        Ok(Flow::Next)
    })
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// One entry of the pipeline.
#[derive(Clone)]
pub enum Stage {
    Middleware(Arc<dyn Middleware>),
    Mount { path: String, router: Router },
    Catch(Arc<ErrorDispatcher>),
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Middleware(_) => f.write_str("Middleware"),
            Self::Mount { path, .. } => f.debug_struct("Mount").field("path", path).finish(),
            Self::Catch(_) => f.write_str("Catch"),
        }
    }
}

/// Normalizes a sub-router name into a mount path: leading `/`, no trailing `/`.
#[must_use]
pub fn mount_path(name: &str) -> String {
    let trimmed = name.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Rewrites `uri` relative to the mount prefix, or `None` if it lies outside.
fn strip_mount(uri: &Uri, prefix: &str) -> Option<Uri> {
    if prefix == "/" {
        return Some(uri.clone());
    }
    let rest = uri.path().strip_prefix(prefix)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    let rest = if rest.is_empty() { "/" } else { rest };
    let path_and_query = match uri.query() {
        Some(query) => format!("{rest}?{query}"),
        None => rest.to_string(),
    };
    path_and_query.parse().ok()
}

/// Carries a request the mounted router did not match back to the pipeline.
#[derive(Clone)]
struct Unmatched(Arc<Mutex<Option<Request>>>);

async fn unmatched_fallback(request: Request) -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    response
        .extensions_mut()
        .insert(Unmatched(Arc::new(Mutex::new(Some(request)))));
    response
}

enum Mounted {
    Handled(Response),
    Unmatched(Request),
}

async fn call_mounted(router: &Router, mut request: Request, inner: Uri) -> Mounted {
    let outer = std::mem::replace(request.uri_mut(), inner);
    let response = match router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let returned = response
        .extensions()
        .get::<Unmatched>()
        .and_then(|unmatched| unmatched.0.lock().take());
    match returned {
        Some(mut request) => {
            *request.uri_mut() = outer;
            Mounted::Unmatched(request)
        }
        None => Mounted::Handled(response),
    }
}

fn catcher(stages: &[Stage], after: usize) -> Option<&Arc<ErrorDispatcher>> {
    stages.iter().skip(after + 1).find_map(|stage| match stage {
        Stage::Catch(dispatcher) => Some(dispatcher),
        _ => None,
    })
}

fn last_catcher(stages: &[Stage]) -> Option<&Arc<ErrorDispatcher>> {
    stages.iter().rev().find_map(|stage| match stage {
        Stage::Catch(dispatcher) => Some(dispatcher),
        _ => None,
    })
}

fn fail(dispatcher: Option<&Arc<ErrorDispatcher>>, err: &HttpError, info: &RequestInfo) -> Response {
    match dispatcher {
        Some(dispatcher) => dispatcher.dispatch(err, info),
        None => dispatch::default_response(err),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered, append-only sequence of request-handling stages.
pub struct Pipeline {
    stages: ArcSwap<Vec<Stage>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Appends a stage.
    pub fn push(&self, stage: Stage) {
        self.stages.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(stage.clone());
            next
        });
    }

    /// Inserts a stage ahead of every existing one.
    pub fn prepend(&self, stage: Stage) {
        self.stages.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.push(stage.clone());
            next.extend(current.iter().cloned());
            next
        });
    }

    /// Appends a middleware stage.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.push(Stage::Middleware(middleware));
    }

    /// Mounts `router` at the path derived from `name`.
    ///
    /// Requests under the prefix reach the router with the prefix stripped.
    /// Requests the router has no route for continue down the pipeline.
    pub fn mount(&self, name: &str, router: Router) {
        self.push(Stage::Mount {
            path: mount_path(name),
            router: router.fallback(unmatched_fallback),
        });
    }

    /// Appends a catch stage backed by `dispatcher`.
    pub fn catch(&self, dispatcher: Arc<ErrorDispatcher>) {
        self.push(Stage::Catch(dispatcher));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.load().is_empty()
    }

    /// Current stages, in order.
    #[must_use]
    pub fn stages(&self) -> Arc<Vec<Stage>> {
        self.stages.load_full()
    }

    /// Runs `request` through the pipeline.
    ///
    /// A failing stage skips to the next catch stage after it; with none
    /// installed the default error response is used. A request no stage
    /// answers becomes a 404 error.
    pub async fn handle(&self, mut request: Request) -> Response {
        let stages = self.stages.load_full();
        let info = RequestInfo::of(&request);

        for (index, stage) in stages.iter().enumerate() {
            let response = match stage {
                Stage::Middleware(middleware) => match middleware.handle(&mut request).await {
                    Ok(Flow::Next) => continue,
                    Ok(Flow::Respond(response)) => response,
                    Err(err) => return fail(catcher(&stages, index), &err, &info),
                },
                Stage::Mount { path, router } => {
                    let Some(inner) = strip_mount(request.uri(), path) else {
                        continue;
                    };
                    match call_mounted(router, request, inner).await {
                        Mounted::Handled(response) => response,
                        Mounted::Unmatched(returned) => {
                            request = returned;
                            continue;
                        }
                    }
                }
                Stage::Catch(_) => continue,
            };

            return match response.extensions().get::<ErrorSlot>().cloned() {
                Some(ErrorSlot(err)) => fail(catcher(&stages, index), &err, &info),
                None => response,
            };
        }

        let err = HttpError::not_found(&info.method, info.uri.path());
        fail(last_catcher(&stages), &err, &info)
    }

    /// Tower service view of this pipeline.
    #[must_use]
    pub fn service(self: &Arc<Self>) -> PipelineService {
        PipelineService::new(Arc::clone(self))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages.load().iter()).finish()
    }
}

/// [`tower::Service`] adapter used as the fallback service of each listener.
#[derive(Clone)]
pub struct PipelineService {
    pipeline: Arc<Pipeline>,
}

impl PipelineService {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

impl tower::Service<Request> for PipelineService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        Box::pin(async move { Ok(pipeline.handle(request).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
