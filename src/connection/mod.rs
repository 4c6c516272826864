pub mod config;

use std::fmt;
use std::sync::Arc;
use crate::core::{RepoError, Result};
use crate::engine::{MemoryEngine, RecordEngine};
use config::{ConnectionConfig, MEMORY_SCHEME, RegistryConfig};

/// Named handle to one backing store.
///
/// Immutable once registered; cloning shares the underlying engine.
#[derive(Clone)]
pub struct ConnectionHandle {
    name: String,
    primary: bool,
    engine: Arc<dyn RecordEngine>,
}

impl ConnectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for the first handle registered.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn engine(&self) -> &Arc<dyn RecordEngine> {
        &self.engine
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("primary", &self.primary)
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Ordered set of connections; registration order is significant everywhere
/// results are reported per connection.
#[derive(Clone, Default, Debug)]
pub struct ConnectionRegistry {
    connections: Vec<ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from settings, opening `memory://` URLs in-process.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        Self::from_config_with(config, |connection| {
            if connection.url.starts_with(MEMORY_SCHEME) {
                Ok(Arc::new(MemoryEngine::new()) as Arc<dyn RecordEngine>)
            } else {
                Err(RepoError::Configuration(format!(
                    "Unsupported connection URL '{}'",
                    connection.url
                )))
            }
        })
    }

    /// Builds a registry from settings with a caller-supplied engine factory.
    pub fn from_config_with<F>(config: &RegistryConfig, mut open: F) -> Result<Self>
    where
        F: FnMut(&ConnectionConfig) -> Result<Arc<dyn RecordEngine>>,
    {
        config.validate()?;

        let mut registry = Self::new();
        for connection in &config.connections {
            let engine = open(connection)?;
            match &connection.name {
                Some(name) => registry.register_named(name, engine)?,
                None => registry.register(engine)?,
            };
        }
        Ok(registry)
    }

    /// Registers `engine` under its positional index.
    pub fn register(&mut self, engine: Arc<dyn RecordEngine>) -> Result<&ConnectionHandle> {
        let name = self.connections.len().to_string();
        self.register_named(&name, engine)
    }

    pub fn register_named(&mut self, name: &str, engine: Arc<dyn RecordEngine>) -> Result<&ConnectionHandle> {
        if self.get(name).is_some() {
            return Err(RepoError::Configuration(format!(
                "Connection '{}' is already registered",
                name
            )));
        }

        let handle = ConnectionHandle {
            name: name.to_string(),
            primary: self.connections.is_empty(),
            engine,
        };
        self.connections.push(handle);
        Ok(&self.connections[self.connections.len() - 1])
    }

    /// Builder-style variant of [`register_named`](Self::register_named).
    pub fn with(mut self, name: &str, engine: Arc<dyn RecordEngine>) -> Result<Self> {
        self.register_named(name, engine)?;
        Ok(self)
    }

    pub fn primary(&self) -> Result<&ConnectionHandle> {
        self.connections
            .first()
            .ok_or_else(|| RepoError::Configuration("No usable connection settings".into()))
    }

    pub fn get(&self, name: &str) -> Option<&ConnectionHandle> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn all(&self) -> &[ConnectionHandle] {
        &self.connections
    }

    /// Connections whose name is in `names`, in registration order; all of
    /// them when `names` is empty.
    pub fn matching(&self, names: &[&str]) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .filter(|c| names.is_empty() || names.contains(&c.name.as_str()))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
