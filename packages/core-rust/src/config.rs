//! In-memory configuration source exposed to other components as `"config"`.
//!
//! Loading configuration files is the embedding application's job; the store
//! only hands out named sections as JSON values.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::component::Component;
use crate::host::Dependencies;

/// Named configuration sections, keyed by component name.
#[derive(Debug, Default)]
pub struct ConfigStore {
    sections: RwLock<Map<String, Value>>,
}

impl ConfigStore {
    /// Name under which the store registers with the host.
    pub const NAME: &'static str = "config";

    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`set`](Self::set).
    #[must_use]
    pub fn with_section(self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Inserts or replaces a section.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.sections.write().insert(name.into(), value);
    }

    /// Returns a copy of a section. `null` sections count as absent.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<Value> {
        self.sections
            .read()
            .get(name)
            .filter(|value| !value.is_null())
            .cloned()
    }
}

impl From<Map<String, Value>> for ConfigStore {
    fn from(sections: Map<String, Value>) -> Self {
        Self {
            sections: RwLock::new(sections),
        }
    }
}

#[async_trait]
impl Component for ConfigStore {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn up(&self, _deps: &Dependencies) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sections_round_trip() {
        let store = ConfigStore::new().with_section("http", json!({ "port": 3000 }));
        assert_eq!(store.section("http"), Some(json!({ "port": 3000 })));
        assert!(store.section("missing").is_none());
    }

    #[test]
    fn null_section_is_absent() {
        let store = ConfigStore::new().with_section("http", Value::Null);
        assert!(store.section("http").is_none());
    }

    #[test]
    fn set_replaces_existing_section() {
        let store = ConfigStore::new().with_section("http", json!({ "port": 1 }));
        store.set("http", json!({ "port": 2 }));
        assert_eq!(store.section("http").unwrap()["port"], 2);
    }
}
