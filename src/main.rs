//! rackfand entry point: CLI, logging, config, loop lifecycle, shutdown.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use rackfan::app::cli::Args;
use rackfan::app::logging::init_tracing;
use rackfan::config::load_config;
use rackfan::controller::controller_for;
use rackfan::driver::{IpmitoolDriver, ManagementDriver};
use rackfan::scheduler::TaskRegistry;
use rackfan::store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Priority: --log-level flag, LOG_LEVEL env, config file default.
    let config = load_config_quiet(&args).await?;
    let log_level = args
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| config.log_level.clone());
    init_tracing(&log_level);

    info!("rackfand v{} starting", env!("CARGO_PKG_VERSION"));

    let driver: Arc<dyn ManagementDriver> = Arc::new(IpmitoolDriver);

    if args.check {
        let mut failures = 0usize;
        for entry in &config.servers {
            match controller_for(&entry.server, Arc::clone(&driver)) {
                Ok(_) => info!(
                    "{}: model '{}' supported",
                    entry.server.name, entry.server.model
                ),
                Err(e) => {
                    error!("{}: {}", entry.server.name, e);
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            anyhow::bail!("{} server(s) failed the configuration check", failures);
        }
        info!("Configuration OK");
        return Ok(());
    }

    // Seed the store from the config file; a real deployment puts a database
    // behind the Store trait and an API layer in front of the registry.
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    for entry in &config.servers {
        store.upsert_server(entry.server.clone()).await?;
        if let Some(curve) = &entry.curve {
            store.set_fan_curve(entry.server.id, curve.clone()).await?;
        }
    }

    let registry = TaskRegistry::new(store, driver);
    registry.start_all().await;

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received (Ctrl+C)");

    registry.shutdown().await;
    info!("rackfand shutdown complete");
    Ok(())
}

/// Config is needed before tracing is up, so load errors go to stderr.
async fn load_config_quiet(args: &Args) -> Result<rackfan::config::DaemonConfig> {
    match load_config(&args.config).await {
        Ok(config) => Ok(config),
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            eprintln!("\nProvide a config file via --config (default: rackfand.json).");
            Err(e)
        }
    }
}
