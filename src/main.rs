use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lagoon_bot::config::{ConfigSource, FileConfig};
use lagoon_bot::irc::client::Client;
use lagoon_bot::irc::transport;
use lagoon_bot::plugin::Registry;
use lagoon_bot::reload::{ReloadHandle, Supervisor};

/// IRC bot with hot-reloadable plugins.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let source = FileConfig::new(args.config);
    let config = source.load().await?;
    info!(path = %source.path().display(), "lagoon-bot starting");

    let stream = transport::connect(&config.server).await?;
    let mut client = Client::new(stream, &config.bot);
    client.greet().await?;

    let shutdown = CancellationToken::new();
    let supervisor = Supervisor::new(client, config, source, Registry::builtin(), shutdown.clone());
    spawn_reload_listener(supervisor.reload_handle());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            ctrl_c.cancel();
        }
    });

    supervisor.run().await?;
    Ok(())
}

#[cfg(unix)]
fn spawn_reload_listener(reload: ReloadHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::user_defined1()) {
        Ok(mut usr1) => {
            info!("send SIGUSR1 to pid {} to reload plugins", std::process::id());
            tokio::spawn(async move {
                while usr1.recv().await.is_some() {
                    info!("SIGUSR1 received, reloading plugins");
                    reload.request();
                }
            });
        }
        Err(e) => warn!(error = %e, "cannot listen for SIGUSR1, live reload disabled"),
    }
}

#[cfg(not(unix))]
fn spawn_reload_listener(_reload: ReloadHandle) {
    warn!("live reload needs SIGUSR1, which this platform lacks");
}
