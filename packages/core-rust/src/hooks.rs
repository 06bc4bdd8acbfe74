//! Named lifecycle callbacks run at fixed activation phases.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

/// Activation phase a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Runs during `up`, before the component finalizes its own state.
    Before,
    /// Runs during `after`, once every component is up.
    After,
}

impl HookPhase {
    /// Returns the lowercase phase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type HookFn<T> = Arc<dyn for<'a> Fn(&'a T) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync>;

struct Hook<T: 'static> {
    phase: HookPhase,
    name: String,
    callback: HookFn<T>,
}

impl<T: 'static> Clone for Hook<T> {
    fn clone(&self) -> Self {
        Self {
            phase: self.phase,
            name: self.name.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

/// Ordered registry of hooks targeting a component of type `T`.
///
/// Hooks of a phase run sequentially in registration order. Each callback
/// borrows the target for the duration of its future.
pub struct Hooks<T: 'static> {
    entries: Mutex<Vec<Hook<T>>>,
}

impl<T: Sync + 'static> Hooks<T> {
    /// Creates an empty hook registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers `callback` under `name` for `phase`.
    pub fn register<F>(&self, phase: HookPhase, name: impl Into<String>, callback: F)
    where
        F: for<'a> Fn(&'a T) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.entries.lock().push(Hook {
            phase,
            name: name.into(),
            callback: Arc::new(callback),
        });
    }

    /// Number of hooks registered for `phase`.
    #[must_use]
    pub fn count(&self, phase: HookPhase) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|hook| hook.phase == phase)
            .count()
    }

    /// Runs every hook registered for `phase` against `target`, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing hook and returns its error, annotated with
    /// the phase and hook name.
    pub async fn run(&self, phase: HookPhase, target: &T) -> anyhow::Result<()> {
        let hooks: Vec<Hook<T>> = self
            .entries
            .lock()
            .iter()
            .filter(|hook| hook.phase == phase)
            .cloned()
            .collect();

        for hook in hooks {
            (hook.callback)(target)
                .await
                .with_context(|| format!("{phase} hook `{}` failed", hook.name))?;
        }
        Ok(())
    }
}

impl<T: Sync + 'static> Default for Hooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Target {
        log: Mutex<Vec<String>>,
    }

    fn target() -> Target {
        Target {
            log: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order_per_phase() {
        let hooks = Hooks::<Target>::new();
        hooks.register(HookPhase::Before, "one", |t: &Target| {
            Box::pin(async move {
                t.log.lock().push("before:one".to_string());
                anyhow::Ok(())
            })
        });
        hooks.register(HookPhase::After, "late", |t: &Target| {
            Box::pin(async move {
                t.log.lock().push("after:late".to_string());
                anyhow::Ok(())
            })
        });
        hooks.register(HookPhase::Before, "two", |t: &Target| {
            Box::pin(async move {
                t.log.lock().push("before:two".to_string());
                anyhow::Ok(())
            })
        });

        let t = target();
        hooks.run(HookPhase::Before, &t).await.unwrap();
        assert_eq!(*t.log.lock(), vec!["before:one", "before:two"]);

        hooks.run(HookPhase::After, &t).await.unwrap();
        assert_eq!(t.log.lock().last().map(String::as_str), Some("after:late"));
        assert_eq!(hooks.count(HookPhase::Before), 2);
        assert_eq!(hooks.count(HookPhase::After), 1);
    }

    #[tokio::test]
    async fn failing_hook_stops_the_phase() {
        let hooks = Hooks::<Target>::new();
        hooks.register(HookPhase::Before, "broken", |_t: &Target| {
            Box::pin(async move { Err::<(), _>(anyhow::anyhow!("boom")) })
        });
        hooks.register(HookPhase::Before, "never", |t: &Target| {
            Box::pin(async move {
                t.log.lock().push("never".to_string());
                anyhow::Ok(())
            })
        });

        let t = target();
        let err = hooks.run(HookPhase::Before, &t).await.unwrap_err();
        assert_eq!(err.to_string(), "before hook `broken` failed");
        assert!(format!("{err:#}").contains("boom"));
        assert!(t.log.lock().is_empty());
    }
}
