//! One generation's worth of loaded plugins.
//!
//! `load` constructs every configured plugin, fills the shared-data store and
//! calls `start` in load order. `spawn` moves each plugin onto its own task
//! running the consume loop. `unload` hands back the shared data so the next
//! generation can pick it up.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::{PluginSeed, Registry};
use super::shared::SharedDataStore;
use super::{Plugin, PluginContext};
use crate::config::PluginEntry;
use crate::irc::client::ClientHandle;
use crate::irc::message::Message;

struct Loaded {
    plugin: Box<dyn Plugin>,
    ctx: PluginContext,
}

/// Sending side of one plugin's inbox.
struct Inlet {
    name: String,
    tx: mpsc::Sender<Arc<Message>>,
}

/// Sending sides of every plugin inbox in a generation.
pub struct Dispatcher {
    inlets: Vec<Inlet>,
}

impl Dispatcher {
    /// Offer `msg` to every plugin inbox without waiting.
    ///
    /// A full inbox drops the message for that plugin only.
    pub fn dispatch(&self, msg: &Arc<Message>) {
        for inlet in &self.inlets {
            match inlet.tx.try_send(Arc::clone(msg)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(plugin = %inlet.name, command = %msg.command, "plugin: inbox full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(plugin = %inlet.name, command = %msg.command, "plugin: inbox closed, dropping message");
                }
            }
        }
    }
}

/// Messages a plugin had received but not yet consumed when its generation
/// ended, keyed by plugin name.
pub type Backlog = HashMap<String, VecDeque<Arc<Message>>>;

pub struct PluginSet {
    pending: Vec<Loaded>,
    dispatcher: Dispatcher,
    store: SharedDataStore,
    backlog: Backlog,
}

impl PluginSet {
    /// Construct and start the plugins named by `entries`.
    ///
    /// An entry that fails to resolve or construct is logged and skipped.
    /// `carried` holds shared data from the previous generation, keyed by
    /// plugin name; entries missing from the new configuration are dropped.
    pub async fn load(
        registry: &Registry,
        entries: &[PluginEntry],
        mut carried: HashMap<String, Value>,
        client: &ClientHandle,
        queue_capacity: usize,
    ) -> Self {
        let store = SharedDataStore::new();
        let mut pending = Vec::with_capacity(entries.len());
        let mut inlets = Vec::with_capacity(entries.len());
        let mut failed = Vec::new();

        for entry in entries {
            let Some(name) = entry.identifier() else {
                warn!(?entry, "plugin: entry has no identifier, skipping");
                continue;
            };
            if inlets.iter().any(|i: &Inlet| i.name == name) {
                warn!(plugin = %name, "plugin: already loaded in this generation, skipping duplicate");
                failed.push(name.to_owned());
                continue;
            }

            let shared_data = carried.remove(name);
            let seed = PluginSeed {
                name: name.to_owned(),
                config: entry.config().cloned(),
                shared_data: shared_data.clone(),
                client: client.clone(),
            };
            let plugin = match registry.construct(seed) {
                Ok(plugin) => plugin,
                Err(e) => {
                    error!(plugin = %name, error = %e, "plugin: failed to load");
                    failed.push(name.to_owned());
                    continue;
                }
            };

            let initial = shared_data.unwrap_or_else(|| plugin.init_shared_data());
            store.set(name, initial).await;

            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            let ctx = PluginContext::new(name.to_owned(), client.clone(), rx, store.clone());
            inlets.push(Inlet {
                name: name.to_owned(),
                tx,
            });
            pending.push(Loaded { plugin, ctx });
        }

        for name in carried.keys() {
            debug!(plugin = %name, "plugin: discarding shared data of plugin no longer configured");
        }

        let names: Vec<&str> = inlets.iter().map(|i| i.name.as_str()).collect();
        info!(plugins = ?names, "plugin: initialized");
        if !failed.is_empty() {
            warn!(plugins = ?failed, "plugin: failed to initialize");
        }

        for loaded in &mut pending {
            if let Err(e) = loaded.plugin.start(&mut loaded.ctx).await {
                error!(plugin = %loaded.ctx.name(), error = %e, "plugin: start failed");
            }
        }

        Self {
            pending,
            dispatcher: Dispatcher { inlets },
            store,
            backlog: Backlog::new(),
        }
    }

    /// Names of the loaded plugins, in load order.
    pub fn names(&self) -> Vec<&str> {
        self.dispatcher.inlets.iter().map(|i| i.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.dispatcher.inlets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatcher.inlets.is_empty()
    }

    pub fn store(&self) -> &SharedDataStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatch(&self, msg: &Arc<Message>) {
        self.dispatcher.dispatch(msg);
    }

    /// Queue messages left over from the previous generation ahead of
    /// anything dispatched to this one. Must be called before `spawn`.
    pub fn restore_backlog(&mut self, mut backlog: Backlog) {
        for loaded in &mut self.pending {
            if let Some(queued) = backlog.remove(loaded.ctx.name()) {
                debug!(plugin = %loaded.ctx.name(), messages = queued.len(), "plugin: restoring backlog");
                loaded.ctx.backlog.extend(queued);
            }
        }
        for (name, queued) in backlog {
            if !queued.is_empty() {
                debug!(plugin = %name, messages = queued.len(), "plugin: discarding backlog of plugin no longer configured");
            }
        }
    }

    /// Move every plugin onto its own task. Tasks end when `token` is
    /// cancelled and hand their context back for [`PluginSet::park`].
    pub fn spawn(&mut self, token: &CancellationToken) -> JoinSet<PluginContext> {
        let mut tasks = JoinSet::new();
        for Loaded { plugin, ctx } in self.pending.drain(..) {
            tasks.spawn(consume(plugin, ctx, token.clone()));
        }
        tasks
    }

    /// Take back a stopped plugin's context and keep whatever it had not
    /// consumed yet.
    pub fn park(&mut self, mut ctx: PluginContext) {
        while let Ok(msg) = ctx.inbox.try_recv() {
            ctx.backlog.push_back(msg);
        }
        if !ctx.backlog.is_empty() {
            debug!(plugin = %ctx.name(), messages = ctx.backlog.len(), "plugin: keeping unconsumed messages");
            let PluginContext { name, backlog, .. } = ctx;
            self.backlog.insert(name, backlog);
        }
    }

    /// Unconsumed messages collected by `park`.
    pub fn take_backlog(&mut self) -> Backlog {
        std::mem::take(&mut self.backlog)
    }

    /// Tear the generation down, returning every plugin's shared data.
    pub async fn unload(self) -> HashMap<String, Value> {
        info!(plugins = ?self.names(), "plugin: unloading");
        self.store.snapshot().await
    }
}

/// Pull messages from the plugin's inbox in order and react to each.
///
/// Errors and panics from `react` are logged and the loop moves on.
/// Cancellation aborts an in-flight `react` at its next await point.
async fn consume(mut plugin: Box<dyn Plugin>, mut ctx: PluginContext, token: CancellationToken) -> PluginContext {
    let name = ctx.name().to_owned();
    debug!(plugin = %name, "plugin: consume loop started");

    loop {
        let msg = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            msg = ctx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let react = AssertUnwindSafe(plugin.react(&msg, &mut ctx)).catch_unwind();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(plugin = %name, message = %msg, "plugin: react aborted by cancellation");
                break;
            }
            result = react => match result {
                Ok(Ok(reaction)) => {
                    debug!(plugin = %name, ?reaction, command = %msg.command, "plugin: reacted");
                }
                Ok(Err(e)) => {
                    warn!(plugin = %name, error = %e, message = %msg, "plugin: react failed");
                }
                Err(_) => {
                    error!(plugin = %name, message = %msg, "plugin: react panicked");
                }
            },
        }
    }

    debug!(plugin = %name, "plugin: consume loop stopped");
    ctx
}
