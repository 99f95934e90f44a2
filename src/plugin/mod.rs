//! Plugin runtime: the capability contract plugins implement, the context
//! they run in, and the per-generation host that loads and drives them.
//!
//! Every plugin gets its own bounded inbox and its own task. The client
//! fans each inbound message out to all inboxes; a plugin that is slow or
//! stuck only delays its own queue.

pub mod command;
pub mod host;
pub mod registry;
pub mod shared;

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::irc::client::{ClientError, ClientHandle};
use crate::irc::message::Message;

pub use command::CommandTable;
pub use host::{Backlog, Dispatcher, PluginSet};
pub use registry::{PluginSeed, Registry};
pub use shared::SharedDataStore;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unknown plugin {0:?}")]
    UnknownPlugin(String),
    #[error("failed to load plugin {name}: {reason}")]
    Load { name: String, reason: String },
    #[error("{0}")]
    Runtime(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("shared data has unexpected shape: {0}")]
    SharedData(#[from] serde_json::Error),
}

impl PluginError {
    pub fn load(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Load {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Outcome of `react` for layers stacked on a plugin (e.g. a command table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// The message was not consumed; later layers may look at it.
    Continue,
    /// The message was consumed; stop routing it further.
    Halt,
}

/// A behavior unit loaded by name from configuration.
#[async_trait]
pub trait Plugin: Send {
    /// Value placed in this plugin's shared-data slot when nothing was
    /// carried over from a previous generation.
    fn init_shared_data(&self) -> Value {
        Value::Null
    }

    /// Called once per generation, after every sibling has been constructed.
    async fn start(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Process exactly one inbound message.
    async fn react(&mut self, msg: &Message, ctx: &mut PluginContext)
        -> Result<Reaction, PluginError>;
}

/// Everything a running plugin may touch besides its own state.
pub struct PluginContext {
    name: String,
    client: ClientHandle,
    inbox: mpsc::Receiver<Arc<Message>>,
    /// Carried over from the previous generation; drained before `inbox`.
    backlog: VecDeque<Arc<Message>>,
    store: SharedDataStore,
}

impl PluginContext {
    pub(crate) fn new(
        name: String,
        client: ClientHandle,
        inbox: mpsc::Receiver<Arc<Message>>,
        store: SharedDataStore,
    ) -> Self {
        Self {
            name,
            client,
            inbox,
            backlog: VecDeque::new(),
            store,
        }
    }

    /// Registry identifier this plugin was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &ClientHandle {
        &self.client
    }

    /// Pull the next message from this plugin's own inbox.
    ///
    /// For plugins that await a correlated reply inside `react`. Messages
    /// taken here are not passed to `react` again.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        match self.backlog.pop_front() {
            Some(msg) => Some(msg),
            None => self.inbox.recv().await,
        }
    }

    /// This plugin's shared data.
    pub async fn shared_data(&self) -> Value {
        self.store.get(&self.name).await.unwrap_or(Value::Null)
    }

    pub async fn set_shared_data(&self, value: Value) {
        self.store.set(&self.name, value).await;
    }

    /// This plugin's shared data, deserialized.
    pub async fn shared_data_as<T: DeserializeOwned>(&self) -> Result<T, PluginError> {
        Ok(serde_json::from_value(self.shared_data().await)?)
    }

    /// Read-only view of another plugin's shared data.
    pub async fn shared_data_of(&self, plugin: &str) -> Option<Value> {
        self.store.get(plugin).await
    }
}
