//! Directory-driven route discovery.
//!
//! Each discovery directory ("volume") is listed once, entries in lexical
//! order, and every entry is resolved into a [`Contribution`] by a
//! [`ModuleLoader`]. The first entry that fails to load aborts the whole scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::contribution::{apply_contribution, Contribution};
use super::Pipeline;
use crate::error::BootError;

/// Resolves a discovered file into a pipeline contribution.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    async fn load(&self, path: &Path) -> anyhow::Result<Contribution>;
}

type Provider = Arc<dyn Fn(&Path) -> anyhow::Result<Contribution> + Send + Sync>;

/// Loader backed by explicitly registered providers, keyed by file stem.
///
/// `routes/users.rs`, `routes/users.json` and `routes/users` all resolve to
/// the provider registered as `users`. An entry with no provider fails.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Provider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` for modules named `name`, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, provider: F)
    where
        F: Fn(&Path) -> anyhow::Result<Contribution> + Send + Sync + 'static,
    {
        self.providers.write().insert(name.into(), Arc::new(provider));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.read().contains_key(name)
    }
}

fn module_name(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

#[async_trait]
impl ModuleLoader for ProviderRegistry {
    async fn load(&self, path: &Path) -> anyhow::Result<Contribution> {
        let name = module_name(path)
            .ok_or_else(|| anyhow!("`{}` has no module name", path.display()))?;
        let provider = self
            .providers
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("no provider registered for module `{name}`"))?;
        provider(path)
    }
}

/// Lists the loadable entries of `dir` in lexical order. Hidden entries are skipped.
///
/// # Errors
///
/// Returns [`BootError::DiscoveryRead`] if the directory cannot be read.
pub async fn list_modules(dir: &Path) -> Result<Vec<PathBuf>, BootError> {
    let read_error = |source| BootError::DiscoveryRead {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut modules = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        modules.push(entry.path());
    }
    modules.sort();
    Ok(modules)
}

/// Loads every module of every directory, in order, into `pipeline`.
///
/// Returns the number of non-empty contributions applied.
///
/// # Errors
///
/// Returns [`BootError::DiscoveryRead`] for an unreadable directory and
/// [`BootError::DiscoveryLoad`] for the first module that fails to load.
/// Contributions applied before the failure stay in the pipeline.
pub async fn scan(
    pipeline: &Pipeline,
    volumes: Vec<PathBuf>,
    loader: &dyn ModuleLoader,
) -> Result<usize, BootError> {
    let mut applied = 0;
    for volume in volumes {
        for path in list_modules(&volume).await? {
            let contribution =
                loader
                    .load(&path)
                    .await
                    .map_err(|source| BootError::DiscoveryLoad {
                        path: path.clone(),
                        source,
                    })?;
            if apply_contribution(pipeline, contribution) {
                applied += 1;
            }
            debug!(module = %path.display(), "route module loaded");
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use axum::body::{to_bytes, Body};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    use super::*;
    use crate::pipeline::{middleware_fn, Flow, Stage};

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    fn named_router(path: &Path) -> anyhow::Result<Contribution> {
        let name = module_name(path).unwrap();
        let body = name.clone();
        Ok(Contribution::router(
            name,
            Router::new().route("/", get(move || async move { body })),
        ))
    }

    #[tokio::test]
    async fn modules_load_in_lexical_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b_posts.rs");
        touch(dir.path(), "a_users.rs");
        touch(dir.path(), ".hidden");
        touch(dir.path(), "c_tags.rs");

        let registry = ProviderRegistry::new();
        for name in ["a_users", "b_posts", "c_tags"] {
            registry.register(name, named_router);
        }

        let pipeline = Pipeline::new();
        let applied = scan(&pipeline, vec![dir.path().to_path_buf()], &registry)
            .await
            .unwrap();
        assert_eq!(applied, 3);

        let mounts: Vec<String> = pipeline
            .stages()
            .iter()
            .filter_map(|stage| match stage {
                Stage::Mount { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(mounts, vec!["/a_users", "/b_posts", "/c_tags"]);
    }

    #[tokio::test]
    async fn earlier_modules_prepare_state_for_later_ones() {
        #[derive(Clone)]
        struct Greeting(&'static str);

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "00-greeting");
        touch(dir.path(), "10-reply");

        let registry = ProviderRegistry::new();
        registry.register("00-greeting", |_path: &Path| {
            Ok(Contribution::from(middleware_fn(|req| {
                req.extensions_mut().insert(Greeting("hello"));
                Ok(Flow::Next)
            })))
        });
        registry.register("10-reply", |_path: &Path| {
            Ok(Contribution::from(middleware_fn(|req| {
                let greeting = req.extensions().get::<Greeting>().map_or("", |g| g.0);
                Ok(Flow::Respond(greeting.into_response()))
            })))
        });

        let pipeline = Pipeline::new();
        scan(&pipeline, vec![dir.path().to_path_buf()], &registry)
            .await
            .unwrap();

        let response = pipeline
            .handle(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await;
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn load_failure_aborts_the_scan() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(first.path(), "a.rs");
        touch(first.path(), "b.rs");
        touch(first.path(), "c.rs");
        touch(second.path(), "d.rs");

        let registry = ProviderRegistry::new();
        registry.register("a", named_router);
        registry.register("b", |_path: &Path| Err(anyhow!("syntax error")));
        registry.register("c", named_router);
        registry.register("d", named_router);

        let pipeline = Pipeline::new();
        let err = scan(
            &pipeline,
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            &registry,
        )
        .await
        .unwrap_err();

        match err {
            BootError::DiscoveryLoad { path, source } => {
                assert_eq!(path, first.path().join("b.rs"));
                assert_eq!(source.to_string(), "syntax error");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipeline.len(), 1);
    }

    #[tokio::test]
    async fn unknown_module_is_a_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "orphan.rs");

        let err = scan(&Pipeline::new(), vec![dir.path().to_path_buf()], &ProviderRegistry::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::DiscoveryLoad { .. }));
    }

    #[tokio::test]
    async fn missing_directory_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");

        let err = list_modules(&missing).await.unwrap_err();
        assert!(matches!(err, BootError::DiscoveryRead { path, .. } if path == missing));
    }

    #[tokio::test]
    async fn empty_contributions_are_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "placeholder");

        let registry = ProviderRegistry::new();
        registry.register("placeholder", |_path: &Path| Ok(Contribution::Empty));
        assert!(registry.contains("placeholder"));

        let pipeline = Pipeline::new();
        let applied = scan(&pipeline, vec![dir.path().to_path_buf()], &registry)
            .await
            .unwrap();
        assert_eq!(applied, 0);
        assert!(pipeline.is_empty());
    }
}
