//! Unified error dispatch for every request that fails in the pipeline.
//!
//! The dispatcher is installed as the last pipeline stage. A failing stage
//! skips straight to it; the dispatcher either delegates to a registered
//! custom handler or classifies the error and renders the stable
//! `{ error, code, message }` JSON body.

use std::sync::Arc;

use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{BootError, ErrorKind, HttpError};

/// Public message of every unclassified failure.
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";

/// Public message of a system error whose code has no standard reason phrase.
pub const UNKNOWN_STATUS_TEXT: &str = "Strange code";

/// Which classification rule matched an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Http,
    System,
    Unclassified,
}

/// Outcome of classifying an [`HttpError`]. The error itself is untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: StatusCode,
    pub class: ErrorClass,
    pub public_message: String,
}

/// Classifies an error by its [`ErrorKind`] discriminant.
///
/// Priority: HTTP-tagged, then system-tagged, then everything else as a 500.
/// A system code outside the valid status range is treated as unclassified.
#[must_use]
pub fn classify(err: &HttpError) -> Classification {
    match err.kind() {
        ErrorKind::Http {
            status,
            status_text,
        } => Classification {
            status: *status,
            class: ErrorClass::Http,
            public_message: status_text.clone(),
        },
        ErrorKind::System { code } => match StatusCode::from_u16(*code) {
            Ok(status) => Classification {
                status,
                class: ErrorClass::System,
                public_message: status
                    .canonical_reason()
                    .unwrap_or(UNKNOWN_STATUS_TEXT)
                    .to_string(),
            },
            Err(_) => unclassified(),
        },
        ErrorKind::Unclassified => unclassified(),
    }
}

fn unclassified() -> Classification {
    Classification {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        class: ErrorClass::Unclassified,
        public_message: INTERNAL_SERVER_ERROR.to_string(),
    }
}

/// JSON body of every default error response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: u16,
    message: &'a str,
}

/// Renders the default response for `err`.
#[must_use]
pub fn default_response(err: &HttpError) -> Response {
    let classification = classify(err);
    let body = ErrorBody {
        error: err.message(),
        code: classification.status.as_u16(),
        message: &classification.public_message,
    };
    (classification.status, Json(body)).into_response()
}

/// Request attributes available to error handlers.
///
/// Captured when the request enters the pipeline, since the request itself
/// may have been consumed by the failing stage.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
}

impl RequestInfo {
    #[must_use]
    pub fn of<B>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
        }
    }
}

/// Custom error handler that replaces default classification entirely.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, err: &HttpError, request: &RequestInfo) -> Response;
}

impl<F> ErrorHandler for F
where
    F: Fn(&HttpError, &RequestInfo) -> Response + Send + Sync + 'static,
{
    fn handle(&self, err: &HttpError, request: &RequestInfo) -> Response {
        self(err, request)
    }
}

/// Catch-all stage at the end of the pipeline.
#[derive(Default)]
pub struct ErrorDispatcher {
    custom: RwLock<Option<Arc<dyn ErrorHandler>>>,
}

impl ErrorDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the custom handler, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::HandlerRegistration`] when `handler` is `None`.
    /// Registration fails immediately instead of on the first failed request.
    pub fn set_handler(&self, handler: Option<Arc<dyn ErrorHandler>>) -> Result<(), BootError> {
        let handler = handler.ok_or(BootError::HandlerRegistration)?;
        *self.custom.write() = Some(handler);
        Ok(())
    }

    #[must_use]
    pub fn has_custom_handler(&self) -> bool {
        self.custom.read().is_some()
    }

    /// Produces the response for a failed request.
    pub fn dispatch(&self, err: &HttpError, request: &RequestInfo) -> Response {
        let custom = self.custom.read().clone();
        if let Some(handler) = custom {
            return handler.handle(err, request);
        }

        let classification = classify(err);
        if classification.class == ErrorClass::Unclassified {
            error!(
                method = %request.method,
                uri = %request.uri,
                error = %err,
                "unhandled error while serving request"
            );
        } else {
            debug!(
                method = %request.method,
                uri = %request.uri,
                status = classification.status.as_u16(),
                error = %err,
                "request failed"
            );
        }
        default_response(err)
    }
}

impl std::fmt::Debug for ErrorDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorDispatcher")
            .field("custom", &self.has_custom_handler())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::Value;

    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn info() -> RequestInfo {
        RequestInfo {
            method: Method::GET,
            uri: Uri::from_static("/things"),
        }
    }

    #[test]
    fn http_error_uses_its_own_status_text() {
        let err = HttpError::new(StatusCode::UNAUTHORIZED, "token expired", "Log in again");
        let classification = classify(&err);
        assert_eq!(classification.status, StatusCode::UNAUTHORIZED);
        assert_eq!(classification.class, ErrorClass::Http);
        assert_eq!(classification.public_message, "Log in again");
    }

    #[test]
    fn system_error_uses_reason_phrase() {
        let classification = classify(&HttpError::system(404, "no such row"));
        assert_eq!(classification.status, StatusCode::NOT_FOUND);
        assert_eq!(classification.class, ErrorClass::System);
        assert_eq!(classification.public_message, "Not Found");
    }

    #[test]
    fn system_error_with_unknown_code_uses_fallback_text() {
        let classification = classify(&HttpError::system(599, "odd"));
        assert_eq!(classification.status.as_u16(), 599);
        assert_eq!(classification.public_message, UNKNOWN_STATUS_TEXT);
    }

    #[test]
    fn system_error_with_invalid_code_is_unclassified() {
        let classification = classify(&HttpError::system(42, "nonsense"));
        assert_eq!(classification.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(classification.class, ErrorClass::Unclassified);
    }

    #[tokio::test]
    async fn unclassified_error_hides_message_behind_fixed_text() {
        let dispatcher = ErrorDispatcher::new();
        let err = HttpError::internal("connection pool exhausted");

        let response = dispatcher.dispatch(&err, &info());
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "connection pool exhausted");
        assert_eq!(body["code"], 500);
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn http_error_body_carries_status_and_text() {
        let dispatcher = ErrorDispatcher::new();
        let err = HttpError::new(StatusCode::UNAUTHORIZED, "token expired", "Log in again");

        let response = dispatcher.dispatch(&err, &info());
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = body_json(response).await;
        assert_eq!(body["error"], "token expired");
        assert_eq!(body["code"], 401);
        assert_eq!(body["message"], "Log in again");
    }

    #[tokio::test]
    async fn custom_handler_bypasses_classification() {
        let dispatcher = ErrorDispatcher::new();
        let handler: Arc<dyn ErrorHandler> = Arc::new(|err: &HttpError, req: &RequestInfo| {
            (StatusCode::IM_A_TEAPOT, format!("{} at {}", err.message(), req.uri.path()))
                .into_response()
        });
        dispatcher.set_handler(Some(handler)).unwrap();

        let response = dispatcher.dispatch(&HttpError::internal("spilled"), &info());
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"spilled at /things");
    }

    #[test]
    fn registering_nothing_fails_immediately() {
        let dispatcher = ErrorDispatcher::new();
        let err = dispatcher.set_handler(None).unwrap_err();
        assert!(matches!(err, BootError::HandlerRegistration));
        assert!(!dispatcher.has_custom_handler());
    }
}
