//! Error types for the HTTP component.
//!
//! [`HttpError`] is the request-time error every pipeline stage may return;
//! the error dispatcher turns it into a JSON response. [`BootError`] covers
//! failures while bringing the component up, starting listeners, or
//! registering handlers.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::dispatch;

// ---------------------------------------------------------------------------
// Request-time errors
// ---------------------------------------------------------------------------

/// Discriminant carried by every [`HttpError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Explicit HTTP failure with a public status text.
    Http {
        status: StatusCode,
        status_text: String,
    },
    /// Failure carrying a numeric status code but no public text. The
    /// standard reason phrase is used when the error is rendered.
    System { code: u16 },
    /// Anything else; always rendered as a 500.
    Unclassified,
}

/// Error raised while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
}

impl HttpError {
    /// HTTP-tagged error with an explicit status and public status text.
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        status_text: impl Into<String>,
    ) -> Self {
        Self {
            kind: ErrorKind::Http {
                status,
                status_text: status_text.into(),
            },
            message: message.into(),
        }
    }

    /// System-tagged error carrying only a numeric code.
    pub fn system(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::System { code },
            message: message.into(),
        }
    }

    /// Error without a domain tag.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unclassified,
            message: message.into(),
        }
    }

    /// 404 for a request no pipeline stage answered.
    pub fn not_found(method: &http::Method, path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("Cannot {method} {path}"),
            "Not Found",
        )
    }

    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<HttpError>() {
            Ok(http) => http,
            Err(other) => Self::internal(other.to_string()),
        }
    }
}

/// Response extension marking a response produced from an [`HttpError`].
///
/// Sub-router handlers return `Result<_, HttpError>`; the pipeline looks for
/// this marker and reroutes the error through the dispatcher, so a custom
/// error handler sees handler failures too.
#[derive(Debug, Clone)]
pub(crate) struct ErrorSlot(pub(crate) Arc<HttpError>);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = dispatch::default_response(&self);
        response.extensions_mut().insert(ErrorSlot(Arc::new(self)));
        response
    }
}

// ---------------------------------------------------------------------------
// Boot-time errors
// ---------------------------------------------------------------------------

/// Failures while activating, starting, or stopping the HTTP component.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("Config field {section} is not defined")]
    MissingConfig { section: &'static str },

    #[error("invalid `{field}` in http config: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("http component has no configuration yet; bring it up before starting")]
    NotConfigured,

    #[error("failed to read discovery directory {}", .path.display())]
    DiscoveryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load route module {}", .path.display())]
    DiscoveryLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Server not started, because http config does not contain any port or server with port")]
    NoListener,

    #[error("failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server on port {port} requires https but no TLS provider is configured")]
    MissingTlsProvider { port: u16 },

    #[error("failed to load TLS certificates")]
    Tls(#[source] io::Error),

    #[error("failed to close listener {addr}: {reason}")]
    Close { addr: String, reason: String },

    #[error("listener {addr} is already closed")]
    AlreadyClosed { addr: String },

    #[error("{index} server of http is not defined. Up http first.")]
    ListenerIndex { index: usize },

    #[error("error handler is not callable")]
    HandlerRegistration,
}
