//! Server lifecycle management helpers.
//!
//! This module encapsulates the heavy lifting so `main.rs` remains a thin
//! orchestrator: building tables from configuration, constructing the
//! replay service, wiring the gRPC server, and coordinating graceful
//! shutdown.

use anyhow::Result;
use log::info;
use replaydb_commons::ServerConfig;
use replaydb_core::{PriorityTable, Table};
use replaydb_rpc::replay_service_server::ReplayServer;
use replaydb_rpc::ReplayServiceImpl;
use std::net::SocketAddr;
use std::sync::Arc;

/// Aggregated application components shared between the gRPC server and
/// shutdown handling.
pub struct ApplicationComponents {
    pub service: ReplayServiceImpl,
}

/// Build the configured tables and initialize the replay service.
pub async fn bootstrap(config: &ServerConfig) -> Result<ApplicationComponents> {
    let mut tables: Vec<Arc<dyn Table>> = Vec::with_capacity(config.tables.len());
    for settings in &config.tables {
        let table = PriorityTable::from_settings(settings)?;
        info!(
            "Registered table '{}' (sampler={}, max_size={})",
            settings.name, settings.sampler, settings.max_size
        );
        tables.push(Arc::new(table));
    }

    let service = ReplayServiceImpl::new(
        tables,
        None,
        config.service.callback_executor_num_threads,
    )?;
    info!(
        "Callback executor started with {} threads",
        config.service.callback_executor_num_threads
    );

    Ok(ApplicationComponents { service })
}

/// Run the gRPC server until a termination signal is received.
pub async fn run(config: &ServerConfig, components: ApplicationComponents) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let service = components.service.clone();

    info!("Replay service listening on {}", addr);
    tonic::transport::Server::builder()
        .add_service(ReplayServer::new(components.service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    // Cancel pending table work and stop the callback executor before exit.
    service.close();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
