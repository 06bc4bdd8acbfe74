//! Tessera HTTP: the `http` component.
//!
//! Composes an ordered request pipeline from inline middleware, named
//! sub-routers, queued extensions and discovered route modules; serves it
//! on one or more listeners; and renders every request failure through a
//! single error dispatcher with a stable `{ error, code, message }` body.
//!
//! ```no_run
//! use serde_json::json;
//! use tessera_core::{ComponentHost, ConfigStore, Log};
//! use tessera_http::HttpComponent;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let host = ComponentHost::new();
//! host.register(ConfigStore::new().with_section("http", json!({ "port": 3000 })));
//! host.register(Log::new());
//! let http = host.register(HttpComponent::with_volumes(["routes"]));
//! host.up().await?;
//! assert_eq!(http.listeners().len(), 1);
//! host.down().await?;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod dispatch;
pub mod error;
pub mod network;
pub mod pipeline;

pub use component::{HttpComponent, Phase};
pub use dispatch::{classify, Classification, ErrorClass, ErrorDispatcher, ErrorHandler, RequestInfo};
pub use error::{BootError, ErrorKind, HttpError};
pub use network::{resolve_bind, HttpConfig, Listener, SkippedServer, StartSummary, Transport};
pub use pipeline::{
    middleware_fn, Contribution, Extension, ExtensionBundle, Flow, Middleware, ModuleLoader,
    Pipeline, ProviderRegistry,
};
