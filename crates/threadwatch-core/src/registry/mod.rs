//! Plugin-based component registry
//!
//! The registry allows page sources and notification sinks to be registered
//! dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use threadwatch_core::registry::ComponentRegistry;
//!
//! let registry = ComponentRegistry::new();
//! threadwatch_source_http::register(&registry);
//! threadwatch_sink_telegram::register(&registry);
//!
//! let source = registry.create_source(&config.page.source)?;
//! let sink = registry.create_sink(&config.sink)?;
//! ```
//!
//! ## Registration
//!
//! Implementations register themselves under the name their configuration
//! variant reports via `type_name()`:
//!
//! ```rust,ignore
//! // In threadwatch-sink-telegram
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_sink("telegram", Box::new(TelegramFactory));
//! }
//! ```

use crate::config::{PageSourceConfig, SinkConfig, StateStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStore, MemoryStateStore};
use crate::traits::{
    NotificationSink, NotificationSinkFactory, PageSource, PageSourceFactory, StateStore,
};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry for plugin-based source and sink creation
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    /// Registered page source factories
    sources: RwLock<HashMap<String, Box<dyn PageSourceFactory>>>,

    /// Registered notification sink factories
    sinks: RwLock<HashMap<String, Box<dyn NotificationSinkFactory>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Source type name (e.g., "http")
    /// - `factory`: Factory object for creating source instances
    pub fn register_source(&self, name: impl Into<String>, factory: Box<dyn PageSourceFactory>) {
        write(&self.sources).insert(name.into(), factory);
    }

    /// Register a notification sink factory
    ///
    /// # Parameters
    ///
    /// - `name`: Sink type name (e.g., "telegram")
    /// - `factory`: Factory object for creating sink instances
    pub fn register_sink(
        &self,
        name: impl Into<String>,
        factory: Box<dyn NotificationSinkFactory>,
    ) {
        write(&self.sinks).insert(name.into(), factory);
    }

    /// Create a page source from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn PageSource>)`: Created source instance
    /// - `Err(Error)`: If the source type is not registered or creation fails
    pub fn create_source(&self, config: &PageSourceConfig) -> Result<Box<dyn PageSource>> {
        let source_type = config.type_name();
        let sources = read(&self.sources);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown page source type: {}", source_type)))?;

        factory.create(config)
    }

    /// Create a notification sink from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NotificationSink>)`: Created sink instance
    /// - `Err(Error)`: If the sink type is not registered or creation fails
    pub fn create_sink(&self, config: &SinkConfig) -> Result<Box<dyn NotificationSink>> {
        let sink_type = config.type_name();
        let sinks = read(&self.sinks);

        let factory = sinks
            .get(sink_type)
            .ok_or_else(|| Error::config(format!("Unknown sink type: {}", sink_type)))?;

        factory.create(config)
    }

    /// Create the state store from configuration
    ///
    /// Both built-in stores prune the seen set to `seen_limit` on save. The
    /// file store fails if its directory is not writable.
    pub async fn create_state_store(
        &self,
        config: &StateStoreConfig,
        seen_limit: usize,
    ) -> Result<Box<dyn StateStore>> {
        match config {
            StateStoreConfig::File { path } => {
                Ok(Box::new(FileStateStore::new(path, seen_limit).await?))
            }
            StateStoreConfig::Memory => Ok(Box::new(MemoryStateStore::with_limit(seen_limit))),
        }
    }

    /// List all registered source types
    pub fn list_sources(&self) -> Vec<String> {
        read(&self.sources).keys().cloned().collect()
    }

    /// List all registered sink types
    pub fn list_sinks(&self) -> Vec<String> {
        read(&self.sinks).keys().cloned().collect()
    }

    /// Check if a source type is registered
    pub fn has_source(&self, name: &str) -> bool {
        read(&self.sources).contains_key(name)
    }

    /// Check if a sink type is registered
    pub fn has_sink(&self, name: &str) -> bool {
        read(&self.sinks).contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSinkFactory;

    impl NotificationSinkFactory for MockSinkFactory {
        fn create(&self, _config: &SinkConfig) -> Result<Box<dyn NotificationSink>> {
            Err(Error::config("Mock sink not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();

        // Initially empty
        assert!(!registry.has_sink("mock"));

        // Register
        registry.register_sink("mock", Box::new(MockSinkFactory));

        // Now present
        assert!(registry.has_sink("mock"));
        assert!(registry.list_sinks().contains(&"mock".to_string()));
    }

    #[test]
    fn test_unknown_types_are_config_errors() {
        let registry = ComponentRegistry::new();
        let err = registry
            .create_sink(&SinkConfig::Custom {
                factory: "nope".to_string(),
                config: serde_json::json!({}),
            })
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(registry.create_source(&PageSourceConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_from_config() {
        let registry = ComponentRegistry::new();
        let store = registry
            .create_state_store(&StateStoreConfig::Memory, 10)
            .await
            .unwrap();
        assert!(store.load().await.seen.is_empty());
    }
}
