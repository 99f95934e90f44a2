//! Generation supervisor and live reload.
//!
//! A generation is one plugin set running on the shared connection. On a
//! reload request the supervisor re-reads configuration first; if that fails
//! nothing changes. Otherwise it cancels the running generation, unloads the
//! plugins while capturing their shared data and unconsumed messages, loads
//! the new set with both and starts the next generation. The supervisor itself is never under
//! the generation's token, so a reload cannot cancel itself half-way.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigSource};
use crate::irc::client::{Client, ClientError, RunExit};
use crate::plugin::{Backlog, PluginSet, Registry};

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("generation failed: {0}")]
    Client(#[from] ClientError),
}

/// Requests a reload from outside the supervisor (e.g. a signal handler).
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ReloadHandle {
    /// Ask for a reload. Requests that pile up while one is in progress
    /// collapse into one.
    pub fn request(&self) {
        if self.tx.send(()).is_err() {
            warn!("reload: supervisor is gone, ignoring request");
        }
    }
}

pub struct Supervisor<S> {
    client: Client,
    config: Config,
    source: S,
    registry: Registry,
    shutdown: CancellationToken,
    reload_tx: mpsc::UnboundedSender<()>,
    reload_rx: mpsc::UnboundedReceiver<()>,
}

impl<S: ConfigSource> Supervisor<S> {
    /// `client` must already be registered (see `Client::greet`).
    /// Cancelling `shutdown` ends the current generation and `run` returns.
    pub fn new(
        client: Client,
        config: Config,
        source: S,
        registry: Registry,
        shutdown: CancellationToken,
    ) -> Self {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        Self {
            client,
            config,
            source,
            registry,
            shutdown,
            reload_tx,
            reload_rx,
        }
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle {
            tx: self.reload_tx.clone(),
        }
    }

    /// Run generations until the connection closes or shutdown is requested.
    pub async fn run(mut self) -> Result<(), ReloadError> {
        let mut carried: HashMap<String, Value> = HashMap::new();
        let mut backlog = Backlog::new();
        let mut generation: u64 = 0;

        loop {
            generation += 1;
            let mut plugins = PluginSet::load(
                &self.registry,
                &self.config.plugins,
                std::mem::take(&mut carried),
                &self.client.handle(),
                self.config.bot.queue_capacity,
            )
            .await;
            plugins.restore_backlog(std::mem::take(&mut backlog));
            info!(generation, plugins = plugins.len(), "reload: generation started");

            let token = self.shutdown.child_token();
            let mut next_config = None;
            let exit = {
                let run = self.client.run(&mut plugins, &token);
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        exit = &mut run => break exit,
                        Some(()) = self.reload_rx.recv(), if next_config.is_none() => {
                            while self.reload_rx.try_recv().is_ok() {}
                            info!(generation, "reload: requested, reading configuration");
                            match self.source.load().await {
                                Ok(config) => {
                                    next_config = Some(config);
                                    token.cancel();
                                }
                                Err(e) => {
                                    error!(generation, error = %e, "reload: aborted, keeping current plugins");
                                }
                            }
                        }
                    }
                }
            };

            backlog = plugins.take_backlog();
            carried = plugins.unload().await;

            match exit {
                Ok(RunExit::Cancelled) => match next_config.take() {
                    Some(config) if !self.shutdown.is_cancelled() => {
                        if config.server != self.config.server {
                            warn!("reload: server settings changed, they apply on next start");
                        }
                        self.client.reconfigure(&config.bot);
                        self.config = config;
                        info!(generation, "reload: loading new plugin set");
                    }
                    _ => {
                        info!(generation, "reload: shutdown requested");
                        return Ok(());
                    }
                },
                Ok(RunExit::Disconnected) => {
                    info!(generation, "reload: connection closed, stopping");
                    return Ok(());
                }
                Err(e) => {
                    error!(generation, error = %e, "reload: generation failed");
                    return Err(e.into());
                }
            }
        }
    }
}
