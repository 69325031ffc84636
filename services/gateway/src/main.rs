//! qscheduler gateway
//!
//! Serves the `QuotaScheduler` gRPC API in front of the in-memory reference
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use qsched_gateway::collaborators::memory::{memory_backend, MemoryStore};
use qsched_gateway::config::Config;
use qsched_gateway::gateway::Gateway;
use qsched_gateway::grpc::QuotaSchedulerService;
use qsched_proto::qscheduler::v1::QuotaSchedulerServer;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to QSCHED_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting qscheduler gateway");
    info!(
        grpc_listen_addr = %config.grpc_listen_addr,
        assign_concurrency = config.gateway.assign_concurrency,
        notify_concurrency = ?config.gateway.notify_concurrency,
        queue_capacity = config.gateway.batch.queue_capacity,
        max_batch_size = config.gateway.batch.max_batch_size,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let gateway = Gateway::new(memory_backend(store), config.gateway.clone())
        .context("Failed to build gateway")?;
    let gateway = Arc::new(gateway);
    let service = QuotaSchedulerService::new(Arc::clone(&gateway));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = config.grpc_listen_addr;
    let mut server_handle = tokio::spawn(async move {
        info!(addr = %addr, "Listening for gRPC connections");
        tonic::transport::Server::builder()
            .add_service(QuotaSchedulerServer::new(service))
            .serve_with_shutdown(addr, async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("gRPC server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            true
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            false
        }
    };

    if interrupted {
        let _ = shutdown_tx.send(true);
        if tokio::time::timeout(Duration::from_secs(10), server_handle)
            .await
            .is_err()
        {
            warn!("gRPC server did not shut down in time");
        }
    }

    // In-flight batches finish; queued ops are failed.
    gateway.shutdown(Duration::from_secs(10)).await;

    info!("Gateway shutdown complete");
    Ok(())
}
