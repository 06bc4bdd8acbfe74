use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

use anyhow::Context;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::component::Component;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the host while resolving or wiring components.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("component `{component}` depends on `{dependency}`, which is not registered")]
    MissingDependency {
        component: &'static str,
        dependency: &'static str,
    },
    #[error("dependency cycle detected at component `{name}`")]
    DependencyCycle { name: &'static str },
    #[error("dependency `{name}` is not available to this component")]
    UnavailableDependency { name: String },
}

// ---------------------------------------------------------------------------
// Shared tables
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Entry {
    component: Arc<dyn Component>,
    any: Arc<dyn Any + Send + Sync>,
}

struct HostInner {
    /// Name-based lookup: component name -> component.
    by_name: DashMap<&'static str, Entry>,
    /// Type-based lookup: `TypeId` -> `Arc<dyn Any + Send + Sync>`.
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order, the tie-breaker for dependency resolution.
    registered: RwLock<Vec<&'static str>>,
    /// Order in which components were last brought up; `down` walks it backwards.
    started: RwLock<Vec<&'static str>>,
}

impl HostInner {
    fn entry(&self, name: &str) -> Option<Entry> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    fn typed<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        self.entry(name)
            .and_then(|entry| entry.any.downcast::<T>().ok())
    }
}

// ---------------------------------------------------------------------------
// ComponentHost
// ---------------------------------------------------------------------------

/// Runtime that composes components and drives their two-phase activation.
///
/// Lookup works by name (`get_by_name`) and by concrete type (`get::<T>`).
/// Activation order is derived from declared dependencies, falling back to
/// registration order for independent components.
pub struct ComponentHost {
    inner: Arc<HostInner>,
}

impl ComponentHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HostInner {
                by_name: DashMap::new(),
                by_type: DashMap::new(),
                registered: RwLock::new(Vec::new()),
                started: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a component and return a typed handle to it.
    ///
    /// Registering a second component under an existing name replaces the
    /// first one but keeps its original registration slot.
    pub fn register<T: Component>(&self, component: T) -> Arc<T> {
        let name = component.name();
        let arc = Arc::new(component);
        let entry = Entry {
            component: arc.clone(),
            any: arc.clone(),
        };
        if self.inner.by_name.insert(name, entry).is_none() {
            self.inner.registered.write().push(name);
        }
        self.inner.by_type.insert(TypeId::of::<T>(), arc.clone());
        arc
    }

    /// Retrieve a component by its concrete type.
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        self.inner
            .by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Retrieve a component by its name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.inner.entry(name).map(|entry| entry.component)
    }

    /// Weak handle to this host, suitable for storing in request state.
    #[must_use]
    pub fn handle(&self) -> HostHandle {
        HostHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Computes the activation order: dependencies first, otherwise
    /// registration order.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::MissingDependency`] if a declared dependency is not
    /// registered and [`HostError::DependencyCycle`] if dependencies loop.
    pub fn activation_order(&self) -> Result<Vec<&'static str>, HostError> {
        let registered = self.inner.registered.read().clone();
        let mut resolved = Vec::with_capacity(registered.len());
        let mut visiting = Vec::new();
        for name in registered {
            self.visit(name, &mut resolved, &mut visiting)?;
        }
        Ok(resolved)
    }

    fn visit(
        &self,
        name: &'static str,
        resolved: &mut Vec<&'static str>,
        visiting: &mut Vec<&'static str>,
    ) -> Result<(), HostError> {
        if resolved.contains(&name) {
            return Ok(());
        }
        if visiting.contains(&name) {
            return Err(HostError::DependencyCycle { name });
        }
        let Some(entry) = self.inner.entry(name) else {
            return Ok(());
        };
        visiting.push(name);
        for &dependency in entry.component.dependencies() {
            let Some(known) = self
                .inner
                .by_name
                .get(dependency)
                .map(|entry| *entry.key())
            else {
                return Err(HostError::MissingDependency {
                    component: name,
                    dependency,
                });
            };
            self.visit(known, resolved, visiting)?;
        }
        visiting.pop();
        resolved.push(name);
        Ok(())
    }

    /// Brings every component up in activation order, then runs every
    /// `after` phase in the same order.
    ///
    /// # Errors
    ///
    /// Returns the first resolution, `up`, or `after` failure. Components
    /// after the failing one are not activated.
    pub async fn up(&self) -> anyhow::Result<()> {
        let order = self.activation_order()?;
        *self.inner.started.write() = Vec::new();

        for name in &order {
            let Some(entry) = self.inner.entry(name) else {
                continue;
            };
            let deps = Dependencies {
                inner: Arc::clone(&self.inner),
                declared: entry.component.dependencies(),
            };
            entry
                .component
                .up(&deps)
                .await
                .with_context(|| format!("component `{name}` failed to come up"))?;
            self.inner.started.write().push(name);
            debug!(component = name, "component up");
        }

        for name in &order {
            if let Some(entry) = self.inner.entry(name) {
                entry
                    .component
                    .after()
                    .await
                    .with_context(|| format!("component `{name}` failed in after phase"))?;
            }
        }
        Ok(())
    }

    /// Shuts down every started component in reverse activation order.
    ///
    /// # Errors
    ///
    /// Returns an error if any component's `down()` call fails.
    pub async fn down(&self) -> anyhow::Result<()> {
        let order = std::mem::take(&mut *self.inner.started.write());
        for name in order.iter().rev() {
            if let Some(entry) = self.inner.entry(name) {
                entry
                    .component
                    .down()
                    .await
                    .with_context(|| format!("component `{name}` failed to shut down"))?;
                debug!(component = name, "component down");
            }
        }
        Ok(())
    }
}

impl Default for ComponentHost {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Dependencies injected into [`Component::up`], restricted to the names the
/// component declared.
pub struct Dependencies {
    inner: Arc<HostInner>,
    declared: &'static [&'static str],
}

impl Dependencies {
    /// Typed access to a declared dependency.
    pub fn get<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        if !self.declared.iter().any(|declared| *declared == name) {
            return None;
        }
        self.inner.typed::<T>(name)
    }

    /// Like [`get`](Self::get), but fails when the dependency is unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::UnavailableDependency`] if `name` was not declared,
    /// is not registered, or is registered with a different type.
    pub fn require<T: Component>(&self, name: &str) -> Result<Arc<T>, HostError> {
        self.get::<T>(name)
            .ok_or_else(|| HostError::UnavailableDependency {
                name: name.to_string(),
            })
    }

    /// Weak handle to the whole host.
    #[must_use]
    pub fn host(&self) -> HostHandle {
        HostHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// HostHandle
// ---------------------------------------------------------------------------

/// Weak reference to a [`ComponentHost`].
///
/// Components hand this out to request handlers, so it must not keep the host
/// alive on its own.
#[derive(Clone)]
pub struct HostHandle {
    inner: Weak<HostInner>,
}

impl HostHandle {
    /// Typed lookup of any registered component by name.
    pub fn get<T: Component>(&self, name: &str) -> Option<Arc<T>> {
        self.inner.upgrade()?.typed::<T>(name)
    }

    /// Returns `true` while the host is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Test component that records lifecycle calls into a shared log.
    struct TestComponent {
        name: &'static str,
        deps: &'static [&'static str],
        up_counter: AtomicU32,
        fail_up: bool,
        order_log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl TestComponent {
        fn new(
            name: &'static str,
            deps: &'static [&'static str],
            order_log: Arc<parking_lot::Mutex<Vec<String>>>,
        ) -> Self {
            Self {
                name,
                deps,
                up_counter: AtomicU32::new(0),
                fail_up: false,
                order_log,
            }
        }
    }

    #[async_trait]
    impl Component for TestComponent {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }

        async fn up(&self, _deps: &Dependencies) -> anyhow::Result<()> {
            self.up_counter.fetch_add(1, Ordering::SeqCst);
            if self.fail_up {
                anyhow::bail!("refusing to come up");
            }
            self.order_log.lock().push(format!("up:{}", self.name));
            Ok(())
        }

        async fn after(&self) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("after:{}", self.name));
            Ok(())
        }

        async fn down(&self) -> anyhow::Result<()> {
            self.order_log.lock().push(format!("down:{}", self.name));
            Ok(())
        }
    }

    /// A component that reads a typed dependency during `up`.
    struct Consumer {
        seen: parking_lot::Mutex<Option<&'static str>>,
    }

    #[async_trait]
    impl Component for Consumer {
        fn name(&self) -> &'static str {
            "consumer"
        }

        fn dependencies(&self) -> &'static [&'static str] {
            &["source"]
        }

        async fn up(&self, deps: &Dependencies) -> anyhow::Result<()> {
            let source = deps.require::<TestComponent>("source")?;
            *self.seen.lock() = Some(source.name);
            assert!(deps.get::<TestComponent>("undeclared").is_none());
            Ok(())
        }
    }

    fn log() -> Arc<parking_lot::Mutex<Vec<String>>> {
        Arc::new(parking_lot::Mutex::new(Vec::new()))
    }

    #[test]
    fn register_and_get_by_name() {
        let host = ComponentHost::new();
        host.register(TestComponent::new("config", &[], log()));

        let component = host.get_by_name("config");
        assert!(component.is_some());
        assert_eq!(component.unwrap().name(), "config");
        assert!(host.get_by_name("nonexistent").is_none());
    }

    #[test]
    fn register_and_get_by_type() {
        let host = ComponentHost::new();
        host.register(Consumer {
            seen: parking_lot::Mutex::new(None),
        });

        assert!(host.get::<Consumer>().is_some());
        assert!(host.get::<TestComponent>().is_none());
    }

    #[test]
    fn activation_order_puts_dependencies_first() {
        let log = log();
        let host = ComponentHost::new();
        host.register(TestComponent::new("http", &["config", "log"], log.clone()));
        host.register(TestComponent::new("log", &["config"], log.clone()));
        host.register(TestComponent::new("config", &[], log));

        let order = host.activation_order().unwrap();
        assert_eq!(order, vec!["config", "log", "http"]);
    }

    #[test]
    fn activation_order_reports_missing_dependency() {
        let host = ComponentHost::new();
        host.register(TestComponent::new("http", &["config"], log()));

        let err = host.activation_order().unwrap_err();
        assert!(matches!(
            err,
            HostError::MissingDependency {
                component: "http",
                dependency: "config"
            }
        ));
    }

    #[test]
    fn activation_order_reports_cycles() {
        let host = ComponentHost::new();
        host.register(TestComponent::new("a", &["b"], log()));
        host.register(TestComponent::new("b", &["a"], log()));

        let err = host.activation_order().unwrap_err();
        assert!(matches!(err, HostError::DependencyCycle { .. }));
    }

    #[tokio::test]
    async fn up_runs_every_up_before_any_after() {
        let log = log();
        let host = ComponentHost::new();
        host.register(TestComponent::new("first", &[], log.clone()));
        host.register(TestComponent::new("second", &["first"], log.clone()));

        host.up().await.unwrap();

        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec!["up:first", "up:second", "after:first", "after:second"]
        );
    }

    #[tokio::test]
    async fn down_runs_in_reverse_order() {
        let log = log();
        let host = ComponentHost::new();
        host.register(TestComponent::new("first", &[], log.clone()));
        host.register(TestComponent::new("second", &[], log.clone()));
        host.register(TestComponent::new("third", &[], log.clone()));

        host.up().await.unwrap();
        log.lock().clear();
        host.down().await.unwrap();

        let entries = log.lock().clone();
        assert_eq!(entries, vec!["down:third", "down:second", "down:first"]);
    }

    #[tokio::test]
    async fn failing_up_aborts_remaining_components() {
        let log = log();
        let host = ComponentHost::new();
        let mut failing = TestComponent::new("broken", &[], log.clone());
        failing.fail_up = true;
        host.register(failing);
        let later = host.register(TestComponent::new("later", &["broken"], log.clone()));

        let err = host.up().await.unwrap_err();
        assert!(format!("{err:#}").contains("refusing to come up"));
        assert_eq!(later.up_counter.load(Ordering::SeqCst), 0);
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn dependencies_give_typed_access() {
        let host = ComponentHost::new();
        host.register(TestComponent::new("source", &[], log()));
        let consumer = host.register(Consumer {
            seen: parking_lot::Mutex::new(None),
        });

        host.up().await.unwrap();
        assert_eq!(*consumer.seen.lock(), Some("source"));
    }

    #[test]
    fn handle_does_not_keep_host_alive() {
        let host = ComponentHost::new();
        host.register(TestComponent::new("config", &[], log()));
        let handle = host.handle();
        assert!(handle.get::<TestComponent>("config").is_some());

        drop(host);
        assert!(!handle.is_alive());
        assert!(handle.get::<TestComponent>("config").is_none());
    }
}
