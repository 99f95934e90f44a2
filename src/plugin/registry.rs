//! Explicit mapping from configured plugin identifiers to constructors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{Plugin, PluginError};
use crate::irc::client::ClientHandle;
use crate::plugins;

/// What a constructor receives.
pub struct PluginSeed {
    /// Identifier the plugin was loaded under.
    pub name: String,
    /// Per-entry configuration, if the entry had one.
    pub config: Option<Value>,
    /// Shared data carried over from the previous generation.
    pub shared_data: Option<Value>,
    pub client: ClientHandle,
}

impl PluginSeed {
    /// Deserialize the per-entry config, falling back to `T::default()`.
    pub fn config_as<T>(&self) -> Result<T, PluginError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match self.config {
            None | Some(Value::Null) => Ok(T::default()),
            Some(ref value) => serde_json::from_value(value.clone())
                .map_err(|e| PluginError::load(&self.name, e)),
        }
    }
}

type Factory = Arc<dyn Fn(PluginSeed) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plugins shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("pong", plugins::pong::construct);
        registry.register("channels", plugins::channels::construct);
        registry.register("commandline", plugins::commandline::construct);
        registry
    }

    /// Register a constructor. A later registration under the same name wins.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(PluginSeed) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn construct(&self, seed: PluginSeed) -> Result<Box<dyn Plugin>, PluginError> {
        let factory = self
            .factories
            .get(&seed.name)
            .ok_or_else(|| PluginError::UnknownPlugin(seed.name.clone()))?;
        factory(seed)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("plugins", &names).finish()
    }
}
