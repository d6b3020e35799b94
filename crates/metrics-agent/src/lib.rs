//! Metrics collection agent (§4.1–§4.3): sampler, dispatcher, and the
//! HTTP/RPC transports. `run` is the single-threaded main loop described in
//! §5 — one `tokio::select!` over the poll ticker, the report ticker, and
//! the shutdown signal.

pub mod config;
pub mod dispatcher;
pub mod sampler;
pub mod transport;

use std::sync::Arc;

use config::AgentConfig;
use metrics_model::StoreState;
use tokio::sync::Mutex;

pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    tracing::info!(address = %config.address, grpc = config.grpc, fan_out = config.fan_out, "starting metrics agent");

    let public_key = match &config.public_key_path {
        Some(path) => Some(metrics_model::envelope::load_public_key(path)?),
        None => None,
    };

    let transport: Arc<dyn dispatcher::Transport> = if config.grpc {
        Arc::new(transport::grpc::GrpcTransport::connect(&config.address, config.hmac_key.clone(), None).await?)
    } else {
        Arc::new(transport::http::HttpTransport::new(&config.address, config.hmac_key.clone(), public_key, None))
    };

    let snapshot = Arc::new(Mutex::new(StoreState::new()));
    let poll_count = Arc::new(std::sync::atomic::AtomicI64::new(0));

    let mut poll_ticker = tokio::time::interval(config.poll_interval);
    let mut report_ticker = tokio::time::interval(config.report_interval);

    loop {
        tokio::select! {
            _ = poll_ticker.tick() => {
                let count = poll_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                let fresh = sampler::sample(count).await;
                *snapshot.lock().await = fresh;
                tracing::debug!(poll_count = count, "sampled a fresh snapshot");
            }
            _ = report_ticker.tick() => {
                let current = snapshot.lock().await.clone();
                dispatcher::dispatch_tick(&current, config.fan_out, Arc::clone(&transport)).await;
                tracing::debug!("report tick complete");
            }
            _ = shutdown_signal() => {
                tracing::info!("shutdown signal received, agent exiting");
                break;
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
