use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Per-generation map from plugin name to that plugin's shared data.
///
/// Plugins run on separate tasks, so access goes through a lock. Each
/// plugin writes only its own slot (see `PluginContext`); reads of other
/// slots hand out clones.
#[derive(Debug, Clone, Default)]
pub struct SharedDataStore {
    slots: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, plugin: &str) -> Option<Value> {
        self.slots.read().await.get(plugin).cloned()
    }

    pub async fn set(&self, plugin: &str, value: Value) {
        self.slots.write().await.insert(plugin.to_owned(), value);
    }

    pub async fn contains(&self, plugin: &str) -> bool {
        self.slots.read().await.contains_key(plugin)
    }

    /// Copy of every slot, for carrying state into the next generation.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.slots.read().await.clone()
    }
}
