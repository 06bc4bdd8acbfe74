//! Pipeline contributions and the one-shot extension queue.
//!
//! A route module or plugin contributes either a middleware stage or a named
//! sub-router. Contributions are applied in the order given; an empty
//! contribution is skipped.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;
use tracing::debug;

use super::{Middleware, Pipeline};

/// One thing added to the pipeline.
#[derive(Clone)]
pub enum Contribution {
    /// A bare request handler, appended as a middleware stage.
    Handler(Arc<dyn Middleware>),
    /// A sub-router, mounted at `/{name}`.
    Router { name: String, router: Router },
    /// Nothing to add.
    Empty,
}

impl Contribution {
    pub fn handler(middleware: impl Middleware) -> Self {
        Self::Handler(Arc::new(middleware))
    }

    pub fn router(name: impl Into<String>, router: Router) -> Self {
        Self::Router {
            name: name.into(),
            router,
        }
    }
}

impl From<Arc<dyn Middleware>> for Contribution {
    fn from(middleware: Arc<dyn Middleware>) -> Self {
        Self::Handler(middleware)
    }
}

impl From<Option<Contribution>> for Contribution {
    fn from(contribution: Option<Contribution>) -> Self {
        contribution.unwrap_or(Self::Empty)
    }
}

impl std::fmt::Debug for Contribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(_) => f.write_str("Handler"),
            Self::Router { name, .. } => f.debug_struct("Router").field("name", name).finish(),
            Self::Empty => f.write_str("Empty"),
        }
    }
}

/// Applies one contribution. Returns `false` if it was empty.
pub fn apply_contribution(pipeline: &Pipeline, contribution: Contribution) -> bool {
    match contribution {
        Contribution::Handler(middleware) => {
            pipeline.use_middleware(middleware);
            true
        }
        Contribution::Router { name, router } => {
            debug!(name = %name, "mounting sub-router");
            pipeline.mount(&name, router);
            true
        }
        Contribution::Empty => false,
    }
}

/// Applies contributions in order and returns how many were non-empty.
pub fn apply_contributions<I>(pipeline: &Pipeline, contributions: I) -> usize
where
    I: IntoIterator<Item = Contribution>,
{
    contributions
        .into_iter()
        .map(|contribution| usize::from(apply_contribution(pipeline, contribution)))
        .sum()
}

/// A group of contributions and extra discovery directories shipped together.
#[derive(Clone, Debug, Default)]
pub struct ExtensionBundle {
    pub middlewares: Vec<Contribution>,
    pub volumes: Vec<PathBuf>,
}

impl ExtensionBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, contribution: Contribution) -> Self {
        self.middlewares.push(contribution);
        self
    }

    #[must_use]
    pub fn with_volume(mut self, volume: impl Into<PathBuf>) -> Self {
        self.volumes.push(volume.into());
        self
    }
}

/// A queued extension.
#[derive(Clone, Debug)]
pub enum Extension {
    Handler(Contribution),
    Bundle(ExtensionBundle),
}

impl From<ExtensionBundle> for Extension {
    fn from(bundle: ExtensionBundle) -> Self {
        Self::Bundle(bundle)
    }
}

impl From<Contribution> for Extension {
    fn from(contribution: Contribution) -> Self {
        Self::Handler(contribution)
    }
}

/// Extensions queued before activation, drained exactly once.
#[derive(Default)]
pub struct ExtensionQueue {
    pending: Mutex<Vec<Extension>>,
}

impl ExtensionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, extension: impl Into<Extension>) {
        self.pending.lock().push(extension.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Empties the queue into `pipeline` and returns the discovery
    /// directories the bundles carried. A second call is a no-op.
    pub fn drain_into(&self, pipeline: &Pipeline) -> Vec<PathBuf> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut volumes = Vec::new();
        for extension in pending {
            match extension {
                Extension::Handler(contribution) => {
                    apply_contribution(pipeline, contribution);
                }
                Extension::Bundle(bundle) => {
                    apply_contributions(pipeline, bundle.middlewares);
                    volumes.extend(bundle.volumes);
                }
            }
        }
        volumes
    }
}
