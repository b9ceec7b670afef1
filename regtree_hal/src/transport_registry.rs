//! Registry of memory transport factories.
//!
//! The server picks its transport by name from the `[memory]` section. The
//! registry is constructed at startup, populated once, then handed to the
//! server core by value. No global state.

use crate::memory::MemoryTransport;
use regtree_common::tree_config::MemoryConfig;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Factory function type for creating transports.
pub type TransportFactory = fn(&MemoryConfig) -> Arc<dyn MemoryTransport>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportRegistryError {
    /// Name registered twice.
    #[error("transport '{0}' is already registered")]
    Duplicate(String),

    /// Name not registered.
    #[error("transport not found: {0}")]
    NotFound(String),
}

/// Name to factory map.
pub struct TransportRegistry {
    factories: HashMap<&'static str, TransportFactory>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in transport.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Names are distinct literals; registration into an empty map cannot collide.
        let _ = crate::drivers::register_builtin_transports(&mut registry);
        registry
    }

    /// Register a factory.
    ///
    /// # Errors
    /// `TransportRegistryError::Duplicate` if the name is taken.
    pub fn register(
        &mut self,
        name: &'static str,
        factory: TransportFactory,
    ) -> Result<(), TransportRegistryError> {
        if self.factories.contains_key(name) {
            return Err(TransportRegistryError::Duplicate(name.to_string()));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Create the transport named by `config.driver`.
    pub fn create(
        &self,
        config: &MemoryConfig,
    ) -> Result<Arc<dyn MemoryTransport>, TransportRegistryError> {
        let factory = self
            .factories
            .get(config.driver.as_str())
            .ok_or_else(|| TransportRegistryError::NotFound(config.driver.clone()))?;
        Ok(factory(config))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
