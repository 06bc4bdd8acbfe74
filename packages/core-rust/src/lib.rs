//! Tessera Core: component host runtime, dependency injection, lifecycle hooks,
//! and the built-in `config` and `log` components.

pub mod component;
pub mod config;
pub mod hooks;
pub mod host;
pub mod log;

pub use component::Component;
pub use config::ConfigStore;
pub use hooks::{HookPhase, Hooks};
pub use host::{ComponentHost, Dependencies, HostError, HostHandle};
pub use log::{init_tracing, Log, LogFormat, LogSettings};
