//! The `http` component: composes the pipeline during `up`, seals it and
//! optionally starts listening during `after`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tessera_core::{Component, ConfigStore, Dependencies, HookPhase, Hooks};
use tracing::{debug, info};

use crate::dispatch::{ErrorDispatcher, ErrorHandler};
use crate::error::BootError;
use crate::network::{build_listener_router, HttpConfig, Listener, ListenerSet, StartSummary};
use crate::pipeline::{
    apply_contribution, apply_contributions, extension_tag, scan, Contribution, Extension,
    ExtensionQueue, Middleware, ModuleLoader, Pipeline, ProviderRegistry, Stage,
};

/// Where the component is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered, not yet up.
    Created,
    /// `up` finished: pipeline composed, nothing listening.
    Composed,
    /// `after` finished without starting listeners.
    Ready,
    /// At least one listener was opened.
    Listening,
    Stopped,
}

/// HTTP lifecycle orchestrator.
///
/// Before `up`, callers add middleware, sub-routers, extensions, discovery
/// directories, route providers and hooks. `up` reads the `http` config
/// section and composes the pipeline; `after` installs the error dispatcher
/// as the last stage, runs `after` hooks and, unless auto-start is off,
/// opens every configured listener.
pub struct HttpComponent {
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<ErrorDispatcher>,
    extensions: ExtensionQueue,
    volumes: Mutex<Vec<PathBuf>>,
    providers: Arc<ProviderRegistry>,
    loader: RwLock<Arc<dyn ModuleLoader>>,
    hooks: Hooks<HttpComponent>,
    listeners: ListenerSet,
    config: ArcSwapOption<HttpConfig>,
    tls: RwLock<Option<RustlsConfig>>,
    auto_start: AtomicBool,
    phase: ArcSwap<Phase>,
}

impl HttpComponent {
    pub const NAME: &'static str = "http";

    /// Components that must be up before this one.
    pub const DEPENDENCIES: &'static [&'static str] = &[ConfigStore::NAME, tessera_core::Log::NAME];

    #[must_use]
    pub fn new() -> Self {
        let providers = Arc::new(ProviderRegistry::new());
        Self {
            pipeline: Arc::new(Pipeline::new()),
            dispatcher: Arc::new(ErrorDispatcher::new()),
            extensions: ExtensionQueue::new(),
            volumes: Mutex::new(Vec::new()),
            loader: RwLock::new(Arc::clone(&providers) as Arc<dyn ModuleLoader>),
            providers,
            hooks: Hooks::new(),
            listeners: ListenerSet::new(),
            config: ArcSwapOption::empty(),
            tls: RwLock::new(None),
            auto_start: AtomicBool::new(true),
            phase: ArcSwap::from_pointee(Phase::Created),
        }
    }

    /// Creates the component with default discovery directories.
    #[must_use]
    pub fn with_volumes<I, P>(volumes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let component = Self::new();
        component
            .volumes
            .lock()
            .extend(volumes.into_iter().map(Into::into));
        component
    }

    // -- composition ------------------------------------------------------

    /// Appends a middleware stage.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.pipeline.use_middleware(middleware);
    }

    /// Mounts a sub-router at `/{name}`.
    pub fn mount(&self, name: &str, router: Router) {
        self.pipeline.mount(name, router);
    }

    /// Applies one contribution now. Returns `false` if it was empty.
    pub fn apply_contribution(&self, contribution: Contribution) -> bool {
        apply_contribution(&self.pipeline, contribution)
    }

    /// Applies contributions now, in order.
    pub fn apply_contributions<I>(&self, contributions: I) -> usize
    where
        I: IntoIterator<Item = Contribution>,
    {
        apply_contributions(&self.pipeline, contributions)
    }

    /// Queues an extension, applied once during `up` after the `before` hooks.
    pub fn extend(&self, extension: impl Into<Extension>) {
        self.extensions.push(extension);
    }

    /// Adds a discovery directory scanned during `up`.
    pub fn add_volume(&self, volume: impl Into<PathBuf>) {
        self.volumes.lock().push(volume.into());
    }

    /// Registers a route provider for discovered modules named `name`.
    pub fn provide<F>(&self, name: impl Into<String>, provider: F)
    where
        F: Fn(&std::path::Path) -> anyhow::Result<Contribution> + Send + Sync + 'static,
    {
        self.providers.register(name, provider);
    }

    /// Replaces the loader used for discovered modules.
    pub fn set_module_loader(&self, loader: Arc<dyn ModuleLoader>) {
        *self.loader.write() = loader;
    }

    /// Registers a named hook for `phase`.
    pub fn hook<F>(&self, phase: HookPhase, name: impl Into<String>, callback: F)
    where
        F: for<'a> Fn(&'a HttpComponent) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register(phase, name, callback);
    }

    // -- error handling ---------------------------------------------------

    /// Replaces default error classification with `handler`.
    ///
    /// # Errors
    ///
    /// Same as [`set_error_handler`](Self::set_error_handler).
    pub fn catch<H: ErrorHandler>(&self, handler: H) -> Result<(), BootError> {
        self.set_error_handler(Some(Arc::new(handler)))
    }

    /// Registers the custom error handler.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::HandlerRegistration`] when `handler` is `None`.
    pub fn set_error_handler(&self, handler: Option<Arc<dyn ErrorHandler>>) -> Result<(), BootError> {
        self.dispatcher.set_handler(handler)
    }

    // -- listeners --------------------------------------------------------

    #[must_use]
    pub fn auto_start(&self) -> bool {
        self.auto_start.load(Ordering::Acquire)
    }

    /// Whether `after` opens the listeners. Defaults to `true`.
    pub fn set_auto_start(&self, enabled: bool) {
        self.auto_start.store(enabled, Ordering::Release);
    }

    /// Sets the provider used by `https` servers.
    pub fn set_tls(&self, tls: RustlsConfig) {
        *self.tls.write() = Some(tls);
    }

    /// Opens every configured listener.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::NotConfigured`] before `up`, otherwise the
    /// failure of [`ListenerSet::start`].
    pub async fn start(&self) -> Result<StartSummary, BootError> {
        let config = self.config.load_full().ok_or(BootError::NotConfigured)?;
        let router = build_listener_router(&self.pipeline);
        let tls = self.tls.read().clone();
        let summary = self.listeners.start(&config, &router, tls.as_ref()).await?;
        self.phase.store(Arc::new(Phase::Listening));
        Ok(summary)
    }

    /// Closes every listener concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub async fn stop(&self) -> Result<(), BootError> {
        self.listeners.stop().await?;
        self.phase.store(Arc::new(Phase::Stopped));
        info!("HTTP Server(s) stopped");
        Ok(())
    }

    /// Live listeners in bind order.
    #[must_use]
    pub fn listeners(&self) -> Vec<Arc<Listener>> {
        self.listeners.all()
    }

    /// Listener at `index`, in bind order.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::ListenerIndex`] naming `index` if there is none.
    pub fn listener_at(&self, index: usize) -> Result<Arc<Listener>, BootError> {
        self.listeners.get(index)
    }

    /// Closes one listener and stops tracking it.
    ///
    /// # Errors
    ///
    /// Propagates the close failure.
    pub async fn close_listener(&self, listener: &Arc<Listener>) -> Result<(), BootError> {
        self.listeners.close(listener).await
    }

    // -- accessors --------------------------------------------------------

    /// Parsed `http` section, available once `up` has run.
    #[must_use]
    pub fn config(&self) -> Option<Arc<HttpConfig>> {
        self.config.load_full()
    }

    /// A component-specific sub-section of the `http` section.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<Value> {
        self.config.load().as_ref()?.section(name).cloned()
    }

    #[must_use]
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        **self.phase.load()
    }

    async fn load_tls(&self, config: &HttpConfig) -> Result<(), BootError> {
        let Some(paths) = &config.tls else {
            return Ok(());
        };
        if self.tls.read().is_some() {
            return Ok(());
        }
        let tls = RustlsConfig::from_pem_file(&paths.cert_path, &paths.key_path)
            .await
            .map_err(BootError::Tls)?;
        *self.tls.write() = Some(tls);
        Ok(())
    }
}

impl Default for HttpComponent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for HttpComponent {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        Self::DEPENDENCIES
    }

    async fn up(&self, deps: &Dependencies) -> anyhow::Result<()> {
        let store = deps.require::<ConfigStore>(ConfigStore::NAME)?;
        let config = HttpConfig::from_section(store.section(HttpConfig::SECTION))?;
        self.load_tls(&config).await?;
        self.config.store(Some(Arc::new(config)));

        self.pipeline
            .prepend(Stage::Middleware(extension_tag(deps.host())));

        self.hooks.run(HookPhase::Before, self).await?;

        let mut volumes = std::mem::take(&mut *self.volumes.lock());
        volumes.extend(self.extensions.drain_into(&self.pipeline));

        let loader = Arc::clone(&*self.loader.read());
        let discovered = scan(&self.pipeline, volumes, loader.as_ref()).await?;
        debug!(discovered, stages = self.pipeline.len(), "http pipeline composed");

        self.phase.store(Arc::new(Phase::Composed));
        Ok(())
    }

    async fn after(&self) -> anyhow::Result<()> {
        self.pipeline.catch(Arc::clone(&self.dispatcher));
        self.hooks.run(HookPhase::After, self).await?;
        self.phase.store(Arc::new(Phase::Ready));

        if self.auto_start() {
            self.start().await?;
        }
        Ok(())
    }

    async fn down(&self) -> anyhow::Result<()> {
        if !self.listeners.is_empty() {
            self.stop().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpComponent")
            .field("phase", &self.phase())
            .field("auto_start", &self.auto_start())
            .field("stages", &self.pipeline.len())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let http = HttpComponent::new();
        assert_eq!(http.name(), "http");
        assert_eq!(http.dependencies(), &["config", "log"]);
        assert!(http.auto_start());
        assert_eq!(http.phase(), Phase::Created);
        assert!(http.config().is_none());
        assert!(http.listeners().is_empty());
    }

    #[test]
    fn null_error_handler_is_rejected() {
        let http = HttpComponent::new();
        assert!(matches!(
            http.set_error_handler(None),
            Err(BootError::HandlerRegistration)
        ));
    }

    #[test]
    fn listener_lookup_before_start_names_the_index() {
        let http = HttpComponent::new();
        let err = http.listener_at(0).unwrap_err();
        assert_eq!(err.to_string(), "0 server of http is not defined. Up http first.");
    }

    #[tokio::test]
    async fn start_before_up_is_not_configured() {
        let http = HttpComponent::new();
        assert!(matches!(http.start().await, Err(BootError::NotConfigured)));
    }

    #[test]
    fn volumes_given_at_construction_are_kept() {
        let http = HttpComponent::with_volumes(["routes", "plugins/routes"]);
        http.add_volume("extra");
        assert_eq!(
            *http.volumes.lock(),
            vec![
                PathBuf::from("routes"),
                PathBuf::from("plugins/routes"),
                PathBuf::from("extra")
            ]
        );
    }
}
