// ReplayDB server entrypoint
//!
//! The heavy lifting (table construction, gRPC wiring, graceful shutdown)
//! lives in dedicated modules so this file remains a thin orchestrator.

mod lifecycle;
mod logging;

use anyhow::Result;
use lifecycle::{bootstrap, run};
use log::info;
use replaydb_commons::ServerConfig;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    // First positional argument overrides the config path
    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");

    // Load configuration (fallback to defaults when config file missing)
    let config = match ServerConfig::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Warning: Failed to load {}: {}", config_path, e);
            eprintln!("Using defaults");
            ServerConfig::default()
        }
    };

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        &config.logging.file_path,
        config.logging.log_to_console,
    )?;

    let version = env!("CARGO_PKG_VERSION");
    info!("ReplayDB Server v{}", version);
    info!(
        "Host: {}  Port: {}  Tables: {}",
        config.server.host,
        config.server.port,
        config.tables.len()
    );

    // Build application state and start table workers
    let components = bootstrap(&config).await?;

    // Run the gRPC server until a termination signal is received
    run(&config, components).await
}
