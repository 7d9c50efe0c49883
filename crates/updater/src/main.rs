//! Oracle updater
//!
//! Main entry point for the price update service

use std::env;
use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use oracle_core::OracleConfig;
use oracle_executor::{ChainClient, JsonRpcChainClient};
use oracle_price_feed::{HttpSourceFactory, PublishedState, SourceFactory};
use oracle_updater::{settings, telemetry, Scheduler, UpdateOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config_path = settings::config_path(env::args().nth(1));
    let config = settings::load(&config_path)?;

    telemetry::init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        tokens = config.tokens.len(),
        "Starting oracle updater"
    );

    let chain: Arc<dyn ChainClient> = Arc::new(JsonRpcChainClient::new(&config.chain)?);
    let sources: Arc<dyn SourceFactory> = Arc::new(HttpSourceFactory::new(&config.sources)?);
    let state = Arc::new(PublishedState::new());

    let (config_tx, config_rx) = watch::channel(Arc::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        sources,
        chain,
        state,
        config_rx.clone(),
        shutdown_rx.clone(),
    ));

    let scheduler = Scheduler::new(orchestrator, config_rx, shutdown_rx);
    let scheduler = tokio::spawn(scheduler.run());

    let signals = handle_signals(&config_path, &config_tx).await;

    // Stop new cycles even if signal handling failed
    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler.await {
        error!("Scheduler task failed: {}", e);
    }

    signals?;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for a termination signal, reloading configuration on SIGHUP
#[cfg(unix)]
async fn handle_signals(
    config_path: &Path,
    config_tx: &watch::Sender<Arc<OracleConfig>>,
) -> anyhow::Result<()> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = unix_signal(SignalKind::terminate())?;
    let mut hangup = unix_signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
                return Ok(());
            }
            _ = terminate.recv() => {
                info!("Received termination signal");
                return Ok(());
            }
            _ = hangup.recv() => reload(config_path, config_tx),
        }
    }
}

#[cfg(not(unix))]
async fn handle_signals(
    _config_path: &Path,
    _config_tx: &watch::Sender<Arc<OracleConfig>>,
) -> anyhow::Result<()> {
    signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload(config_path: &Path, config_tx: &watch::Sender<Arc<OracleConfig>>) {
    match settings::load(config_path) {
        Ok(config) => {
            let current = Arc::clone(&config_tx.borrow());
            if config.chain.rpc_url != current.chain.rpc_url || config.sources != current.sources {
                warn!("Chain RPC and source client settings apply after restart");
            }
            info!(tokens = config.tokens.len(), "Configuration reloaded");
            config_tx.send_replace(Arc::new(config));
        }
        Err(e) => error!("Configuration reload rejected, keeping current: {:#}", e),
    }
}
