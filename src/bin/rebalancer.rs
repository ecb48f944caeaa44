//! Rebalancer Service
//!
//! Main service binary that runs the rebalancer concurrently with its feeds:
//! - Snapshot poller: fetches aggregate balances from the balance aggregator
//! - Orchestrator: analyzes snapshots, creates and executes rebalance operations
//! - Observer API: exposes operations, the active config and an event stream
//!
//! Sending SIGHUP re-reads the config file and swaps in its `[rebalance]`
//! section. An invalid file is rejected and the active config is kept.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin rebalancer -- --config config/rebalancer.toml
//! ```
//!
//! Or set the config path via environment variable:
//!
//! ```bash
//! REBALANCER_CONFIG_PATH=config/rebalancer.toml cargo run --bin rebalancer
//! ```

use anyhow::Result;
use clap::Parser;
use rebalancer::{
    api::{run_api_server, ApiState},
    BridgeAdapter, ConfigHandle, FailureTracker, OperationStore, RebalanceOrchestrator,
    RebalancerConfig, SnapshotPoller, SnapshotPublisher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "rebalancer")]
#[command(about = "Solver fund rebalancer - keeps cross-chain liquidity near target allocations")]
struct Args {
    /// Path to configuration file (default: config/rebalancer.toml or REBALANCER_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first (before initializing logging)
    let args = Args::parse();

    // Initialize structured logging
    tracing_subscriber::fmt::init();

    info!("Starting Rebalancer Service");

    // Priority: CLI arg > env var > default
    match (&args.config, std::env::var("REBALANCER_CONFIG_PATH")) {
        (Some(path), _) => info!("Loading configuration from: {}", path),
        (None, Ok(path)) => info!("Loading configuration from REBALANCER_CONFIG_PATH: {}", path),
        (None, Err(_)) => info!("Loading configuration from default location"),
    }
    let config = RebalancerConfig::load_from_path(args.config.as_deref())?;

    info!("Configuration loaded successfully");
    info!("Balance source: {}", config.service.balance_source_url);
    info!("Bridge API: {}", config.bridge.api_url);
    info!("Depositor: {}", config.bridge.depositor);
    info!(
        "Rebalancing {} (min ${:.2}, max ${:.2}, cooldown {}ms)",
        if config.rebalance.global.enabled { "enabled" } else { "disabled" },
        config.rebalance.global.min_rebalance_usd_value,
        config.rebalance.global.max_rebalance_usd_value,
        config.rebalance.global.cooldown_period_ms
    );

    let config_handle = ConfigHandle::new(config.rebalance.clone())?;
    let store = Arc::new(OperationStore::new());
    let failures = Arc::new(FailureTracker::new());
    let executor = Arc::new(BridgeAdapter::from_config(&config)?);
    info!("Bridge adapter initialized");

    let orchestrator = RebalanceOrchestrator::new(
        config_handle.clone(),
        &config.service,
        store.clone(),
        failures,
        executor,
    );

    let publisher = SnapshotPublisher::new();
    let poller = SnapshotPoller::new(
        config.service.balance_source_url.clone(),
        Duration::from_millis(config.service.balance_poll_interval_ms),
    )?;

    info!("Starting all services...");

    let poller_publisher = publisher.clone();
    tokio::spawn(async move { poller.run(poller_publisher).await });

    tokio::spawn(reload_on_sighup(args.config.clone(), config_handle.clone()));

    let api_state = ApiState {
        store,
        config: config_handle,
    };
    let api_server = tokio::spawn(run_api_server(
        api_state,
        config.service.api_host.clone(),
        config.service.api_port,
        shutdown_signal(),
    ));

    orchestrator.run(publisher.subscribe(), shutdown_signal()).await;

    if let Err(e) = api_server.await {
        error!("API server task failed: {}", e);
    }

    info!("Rebalancer service stopped");
    Ok(())
}

/// Resolves on Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal, stopping services...");
}

/// Re-reads the config file on every SIGHUP and swaps in the new rebalance section.
#[cfg(unix)]
async fn reload_on_sighup(path: Option<String>, handle: ConfigHandle) {
    use signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGHUP handler, hot-reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading configuration");
        match RebalancerConfig::load_from_path(path.as_deref()) {
            Ok(config) => match handle.replace(config.rebalance) {
                Ok(()) => info!("Rebalance configuration reloaded"),
                Err(e) => error!("Rejected configuration reload: {}", e),
            },
            Err(e) => error!("Rejected configuration reload: {:#}", e),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_sighup(_path: Option<String>, _handle: ConfigHandle) {}
