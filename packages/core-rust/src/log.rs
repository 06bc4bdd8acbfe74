//! Log sink component (`"log"`) backed by a global `tracing` subscriber.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::component::Component;
use crate::config::ConfigStore;
use crate::host::Dependencies;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Contents of the optional `log` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG` when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Installs the global tracing subscriber.
///
/// Returns `false` when a global subscriber was already installed, which is
/// the normal case for a second host in the same process.
pub fn init_tracing(settings: &LogSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.format {
        LogFormat::Json => builder.json().try_init().is_ok(),
        LogFormat::Pretty => builder.try_init().is_ok(),
    }
}

/// Component that configures logging from the `log` config section.
#[derive(Debug, Default)]
pub struct Log {
    installed: AtomicBool,
}

impl Log {
    pub const NAME: &'static str = "log";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this component installed the global subscriber.
    #[must_use]
    pub fn installed(&self) -> bool {
        self.installed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Component for Log {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[ConfigStore::NAME]
    }

    async fn up(&self, deps: &Dependencies) -> anyhow::Result<()> {
        let settings = match deps
            .get::<ConfigStore>(ConfigStore::NAME)
            .and_then(|config| config.section(Self::NAME))
        {
            Some(section) => serde_json::from_value::<LogSettings>(section)?,
            None => LogSettings::default(),
        };
        self.installed
            .store(init_tracing(&settings), Ordering::Relaxed);
        Ok(())
    }
}
