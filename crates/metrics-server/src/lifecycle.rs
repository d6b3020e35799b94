//! Startup / runtime / shutdown orchestration (§4.7). Grounded on
//! `examples/estuary-flow/crates/connector-init/src/lib.rs` for the
//! dual HTTP+RPC serve loop with a shared cancellation token, and on
//! `examples/original_source/internal/api/middleware.go` /
//! `cmd/server/main.go` (via `original_source/_INDEX.md`) for the
//! snapshot-ticker-plus-signal-driven-shutdown shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as GrpcServer;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::ingress::grpc::MetricsServiceImpl;
use crate::ingress::{http, AppState};
use crate::middleware::Pipeline;
use crate::storage::memory::MemoryStorage;
use crate::storage::postgres::PostgresStorage;
use crate::storage::Storage;
use metrics_model::proto_gen::metrics_service_server::MetricsServiceServer;

const HTTP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let storage = build_storage(&config).await?;

    if config.restore {
        if let Some(snapshottable) = storage.as_snapshottable() {
            snapshottable.restore_snapshot(&config.snapshot_path).await?;
            tracing::info!(path = %config.snapshot_path.display(), "restored store state from snapshot");
        } else {
            tracing::warn!("restore requested but the active backend doesn't support snapshots, ignoring");
        }
    }

    let private_key = match &config.private_key_path {
        Some(path) => Some(metrics_model::envelope::load_private_key(path)?),
        None => None,
    };

    let pipeline = Pipeline::new(config.hmac_key.clone(), private_key, config.trusted_subnet);
    let shutdown = CancellationToken::new();

    let state = AppState {
        storage: Arc::clone(&storage),
        pipeline,
        shutdown: shutdown.clone(),
        hmac_key: config.hmac_key.clone(),
    };

    let http_addr: SocketAddr = config.address.parse()?;
    let grpc_addr: SocketAddr = config.grpc_address.parse()?;

    let http_listener = TcpListener::bind(http_addr).await?;
    tracing::info!(address = %http_addr, "HTTP ingress listening");

    let http_router = http::router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let http_shutdown = shutdown.clone();
    let http_server = tokio::spawn(async move {
        let serve = axum::serve(http_listener, http_router)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await });
        // HTTP graceful shutdown drains in-flight requests for up to 5s,
        // then force-stops (§4.7, §5, §8 scenario 6).
        match tokio::time::timeout(HTTP_SHUTDOWN_GRACE, async move { serve.await }).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("HTTP graceful shutdown exceeded its 5s grace period, forcing stop");
                Ok(())
            }
        }
    });

    let grpc_shutdown = shutdown.clone();
    let grpc_server = tokio::spawn(async move {
        tracing::info!(address = %grpc_addr, "RPC ingress listening");
        GrpcServer::builder()
            .add_service(MetricsServiceServer::new(MetricsServiceImpl::new(state)))
            .serve_with_shutdown(grpc_addr, async move { grpc_shutdown.cancelled().await })
            .await
    });

    let snapshot_task = spawn_snapshot_ticker(Arc::clone(&storage), config.store_interval, config.snapshot_path.clone(), shutdown.clone());

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight requests");
    shutdown.cancel();

    let _ = http_server.await?;
    let _ = grpc_server.await?;
    snapshot_task.await?;

    if let Some(snapshottable) = storage.as_snapshottable() {
        snapshottable.save_snapshot(&config.snapshot_path).await?;
        tracing::info!("final snapshot written");
    }

    Ok(())
}

async fn build_storage(config: &ServerConfig) -> Result<Arc<dyn Storage>, ApiError> {
    match &config.database_dsn {
        Some(dsn) => {
            tracing::info!("using the relational storage backend");
            Ok(Arc::new(PostgresStorage::connect(dsn).await?))
        }
        None => {
            tracing::info!("using the in-memory storage backend");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

/// Periodically snapshots the store to disk (§4.7). Only fires for backends
/// that implement [`crate::storage::Snapshottable`]; other backends persist
/// through their own durability instead, so the ticker is a no-op for them.
fn spawn_snapshot_ticker(
    storage: Arc<dyn Storage>,
    interval: std::time::Duration,
    path: std::path::PathBuf,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(snapshottable) = storage.as_snapshottable() {
                        if let Err(err) = snapshottable.save_snapshot(&path).await {
                            tracing::warn!(error = %err, "periodic snapshot failed");
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigquit.recv() => {}
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
