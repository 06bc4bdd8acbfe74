use std::any::Any;

use async_trait::async_trait;

use crate::host::Dependencies;

/// Unit of composition managed by a [`ComponentHost`](crate::ComponentHost).
///
/// Components declare the names of the components they depend on. The host
/// brings every component up in dependency order, then runs every `after`
/// callback in the same order once all of them are up, and finally calls
/// `down` in reverse order on shutdown. The `Any` bound enables typed lookup
/// via [`Dependencies::get`].
#[async_trait]
pub trait Component: Send + Sync + Any {
    /// Returns the unique name of this component (e.g., `"config"`, `"http"`).
    fn name(&self) -> &'static str;

    /// Names of the components that must be up before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// First activation phase. Declared dependencies are already up.
    async fn up(&self, deps: &Dependencies) -> anyhow::Result<()>;

    /// Second activation phase, run after every registered component is up.
    async fn after(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources held by the component.
    async fn down(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
