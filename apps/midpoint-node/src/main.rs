//! Provisioning node.
//!
//! Runs the task runtime with live sync and import handlers against an
//! in-memory repository. Connectors come from the dummy connector bundle;
//! resources, users and tasks are seeded from an optional bootstrap file.

mod bootstrap;
mod config;
mod logging;

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use midpoint_connector_dummy::{DummyConnectorBuilder, DummyResourceRegistry};
use midpoint_provisioning::prelude::*;
use midpoint_ucf::ConnectorFactory;

use bootstrap::Bootstrap;
use config::NodeConfig;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = NodeConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    logging::init_logging(&config.log_filter);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        node = %config.node_id,
        scan_interval_ms = config.scan_interval.as_millis() as u64,
        lease_secs = config.lease_duration.as_secs(),
        "Starting provisioning node"
    );

    let factory = Arc::new(ConnectorFactory::new());
    factory
        .register(Arc::new(DummyConnectorBuilder::new(DummyResourceRegistry::new())))
        .await;

    let repository = Arc::new(InMemoryRepository::new());
    let engine = Arc::new(ReconciliationEngine::new(
        repository.clone(),
        ResourceManager::new(factory.clone()),
    ));
    let service = Arc::new(SynchronizationService::new(engine.clone()));

    let runtime = TaskRuntime::new(repository.clone(), config.runtime_config());
    runtime
        .register_handler(Arc::new(ImportTaskHandler::new(service.clone())))
        .await;
    runtime
        .register_handler(Arc::new(LiveSyncTaskHandler::new(
            service,
            LiveSyncConfig::default(),
        )))
        .await;

    if let Some(path) = &config.bootstrap_file {
        let loaded = match Bootstrap::load(path).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "Bootstrap failed");
                std::process::exit(1);
            }
        };
        if let Err(e) = loaded.apply(repository.as_ref(), &engine, &runtime).await {
            error!(error = %e, "Bootstrap failed");
            std::process::exit(1);
        }
    }

    let scheduler = runtime.start();
    info!(node = %runtime.node_id(), "Task runtime started");

    shutdown_signal().await;

    runtime.shutdown().await;
    if let Err(e) = scheduler.await {
        error!(error = %e, "Task scheduler ended abnormally");
    }
    factory.dispose_all().await;
    info!("Node shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
