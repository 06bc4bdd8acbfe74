//! Transport-level Tower layers wrapped around every listener.
//!
//! These run outside the composed pipeline: they tag each request with an
//! `X-Request-Id`, open a tracing span per request, and echo the id back on
//! the response. Ordering follows the outer-to-inner convention: the first
//! layer listed sees the request first.

use axum::http::header::HeaderName;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::pipeline::{Pipeline, PipelineService};

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The composed Tower layer type produced by [`build_transport_layers`].
type TransportLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
        >,
        tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
    >,
>;

/// Builds the transport layers shared by every listener.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` unless the client sent one
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_transport_layers() -> TransportLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Router served by each listener: the pipeline as the sole fallback
/// service, wrapped in the transport layers.
pub fn build_listener_router(pipeline: &std::sync::Arc<Pipeline>) -> Router {
    Router::new()
        .fallback_service(PipelineService::new(std::sync::Arc::clone(pipeline)))
        .layer(build_transport_layers())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::{middleware_fn, Flow};

    #[tokio::test]
    async fn listener_router_assigns_request_ids() {
        let pipeline = Arc::new(Pipeline::new());
        pipeline.use_middleware(middleware_fn(|_req| {
            Ok(Flow::Respond(StatusCode::NO_CONTENT.into_response()))
        }));

        let response = build_listener_router(&pipeline)
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn listener_router_keeps_client_request_id() {
        let pipeline = Arc::new(Pipeline::new());
        let response = build_listener_router(&pipeline)
            .oneshot(
                Request::get("/missing")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "abc-123");
    }
}
