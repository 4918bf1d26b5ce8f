use raster_orchestrator::{app_state::build_job_service, config::AppConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting raster worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    if config.redis_url.is_none() {
        tracing::warn!("REDIS_URL not set; this worker only sees jobs submitted in its own process");
    }

    let service = build_job_service(&config, true).expect("Failed to initialize worker");

    tracing::info!(
        executors = config.max_concurrent_jobs,
        operations = ?service.registered_operations(),
        "Worker ready, processing jobs"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
            _ = ticker.tick() => {
                if let Some(pool) = service.pool() {
                    let stats = pool.totals().await;
                    let status = pool.status().await;
                    tracing::info!(
                        live_workers = pool.live_workers(),
                        active_tasks = status.total_active_tasks,
                        processed = stats.processed,
                        succeeded = stats.succeeded,
                        failed = stats.failed,
                        cancelled = stats.cancelled,
                        timed_out = stats.timed_out,
                        skipped = stats.skipped,
                        "Worker stats"
                    );
                }
            }
        }
    }

    tracing::info!("Shutdown signal received, draining in-flight jobs");
    service.shutdown().await;
    tracing::info!("Worker stopped");
}
