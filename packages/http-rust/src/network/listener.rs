//! Live listening sockets and the ordered set that owns them.
//!
//! Listeners are opened one at a time: the primary port first, then each
//! `servers` entry in configured order. Positions in the set therefore match
//! bind order, and dependents address listeners by that position.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::{HttpConfig, InvalidServerEntry, PortValue, ServerDescriptor, Transport};
use crate::error::BootError;

/// One bound socket serving the listener router.
pub struct Listener {
    local_addr: SocketAddr,
    bind: String,
    transport: Transport,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl Listener {
    /// Binds `bind:port` and starts serving `router` on it.
    ///
    /// Port 0 binds an OS-assigned ephemeral port; see [`Listener::port`].
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Bind`] if the address cannot be bound and
    /// [`BootError::MissingTlsProvider`] for a secure listener without `tls`.
    pub async fn open(
        bind: &str,
        port: u16,
        transport: Transport,
        router: Router,
        tls: Option<&RustlsConfig>,
    ) -> Result<Arc<Self>, BootError> {
        let addr = format!("{bind}:{port}");
        let bind_error = |source| BootError::Bind {
            addr: addr.clone(),
            source,
        };

        let tls = match transport {
            Transport::Plain => None,
            Transport::Secure => Some(tls.cloned().ok_or(BootError::MissingTlsProvider { port })?),
        };

        let listener = TcpListener::bind((bind, port)).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let (shutdown, mut signal) = watch::channel(false);

        let task = match tls {
            None => tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = signal.wait_for(|stop| *stop).await;
                    })
                    .await
            }),
            Some(tls) => {
                let std_listener = listener.into_std().map_err(bind_error)?;
                let handle = axum_server::Handle::new();
                let shutdown_handle = handle.clone();
                tokio::spawn(async move {
                    let _ = signal.wait_for(|stop| *stop).await;
                    shutdown_handle.graceful_shutdown(None);
                });
                tokio::spawn(
                    axum_server::from_tcp_rustls(std_listener, tls)
                        .handle(handle)
                        .serve(router.into_make_service()),
                )
            }
        };

        debug!(addr = %local_addr, transport = %transport, "listener opened");
        Ok(Arc::new(Self {
            local_addr,
            bind: bind.to_string(),
            transport,
            shutdown,
            task: Mutex::new(Some(task)),
        }))
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Bind host the listener was opened with.
    #[must_use]
    pub fn bind(&self) -> &str {
        &self.bind
    }

    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Stops accepting connections and waits for in-flight ones to finish.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::AlreadyClosed`] on a second call and
    /// [`BootError::Close`] if the server task ended with an error.
    pub async fn close(&self) -> Result<(), BootError> {
        let Some(task) = self.task.lock().take() else {
            return Err(BootError::AlreadyClosed {
                addr: self.local_addr.to_string(),
            });
        };
        self.shutdown.send_replace(true);

        let close_error = |reason: String| BootError::Close {
            addr: self.local_addr.to_string(),
            reason,
        };
        match task.await {
            Ok(Ok(())) => {
                debug!(addr = %self.local_addr, "listener closed");
                Ok(())
            }
            Ok(Err(e)) => Err(close_error(e.to_string())),
            Err(e) => Err(close_error(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("bind", &self.bind)
            .field("transport", &self.transport)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A `servers` entry that was skipped at start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedServer {
    /// Position of the entry in `servers`.
    pub index: usize,
    pub reason: InvalidServerEntry,
}

/// Outcome of a successful [`ListenerSet::start`].
#[derive(Debug)]
pub struct StartSummary {
    /// Listeners opened by this start, in bind order.
    pub listeners: Vec<Arc<Listener>>,
    pub skipped: Vec<SkippedServer>,
}

/// Insertion-ordered set of live listeners.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<Listener>>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every listener described by `config`, serving `router`.
    ///
    /// Invalid `servers` entries are skipped with a warning. A bind failure
    /// stops the loop; listeners opened before it stay open and tracked.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::NoListener`] if nothing was opened, or the first
    /// bind failure.
    pub async fn start(
        &self,
        config: &HttpConfig,
        router: &Router,
        tls: Option<&RustlsConfig>,
    ) -> Result<StartSummary, BootError> {
        let mut opened = Vec::new();
        let mut skipped = Vec::new();

        if let PortValue::Valid(port) = config.port {
            let listener =
                Listener::open(&config.bind, port, Transport::Plain, router.clone(), None).await?;
            self.track(&listener);
            opened.push(listener);
        }

        for (index, entry) in config.servers.iter().enumerate() {
            let descriptor = match ServerDescriptor::from_value(entry) {
                Ok(descriptor) => descriptor,
                Err(reason) => {
                    warn!(index, "{reason}");
                    skipped.push(SkippedServer { index, reason });
                    continue;
                }
            };
            let listener = Listener::open(
                &descriptor.bind,
                descriptor.port,
                descriptor.transport,
                router.clone(),
                tls,
            )
            .await?;
            self.track(&listener);
            opened.push(listener);
        }

        if opened.is_empty() {
            return Err(BootError::NoListener);
        }

        let addrs: Vec<String> = opened
            .iter()
            .map(|listener| format!("{}:{}", listener.bind(), listener.port()))
            .collect();
        info!("HTTP Server(s) started: {}", addrs.join(", "));

        Ok(StartSummary {
            listeners: opened,
            skipped,
        })
    }

    /// Closes every listener concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first close failure once every close has finished.
    /// Listeners that failed to close stay tracked.
    pub async fn stop(&self) -> Result<(), BootError> {
        let listeners = self.all();
        let results = join_all(listeners.iter().map(|listener| listener.close())).await;

        let mut first_error = None;
        for (listener, result) in listeners.iter().zip(results) {
            match result {
                Ok(()) | Err(BootError::AlreadyClosed { .. }) => self.untrack(listener),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes one listener and removes it from the set.
    ///
    /// # Errors
    ///
    /// Propagates the failure of [`Listener::close`].
    pub async fn close(&self, listener: &Arc<Listener>) -> Result<(), BootError> {
        let result = listener.close().await;
        if matches!(result, Ok(()) | Err(BootError::AlreadyClosed { .. })) {
            self.untrack(listener);
        }
        result
    }

    /// Listener at `index`, in bind order.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::ListenerIndex`] if no listener is at `index`.
    pub fn get(&self, index: usize) -> Result<Arc<Listener>, BootError> {
        self.listeners
            .read()
            .get(index)
            .cloned()
            .ok_or(BootError::ListenerIndex { index })
    }

    /// Snapshot of the live listeners, in bind order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Listener>> {
        self.listeners.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn track(&self, listener: &Arc<Listener>) {
        self.listeners.write().push(Arc::clone(listener));
    }

    fn untrack(&self, listener: &Arc<Listener>) {
        self.listeners
            .write()
            .retain(|tracked| !Arc::ptr_eq(tracked, listener));
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.listeners.read().iter()).finish()
    }
}
