use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::{
    dispatcher::JobService,
    geo::{GeoBackend, GeoError},
    geo_client::GeoServiceClient,
    operations::Collaborators,
    preview::PreviewService,
    queue::{Broker, MemoryBroker, QueueError, RedisBroker},
    registry::OperationRegistry,
    storage::{LocalStorage, ObjectStorage, RasterStorage, StorageError},
    store::{JobLedger, JobStore, MemoryJobStore, RedisJobStore, StoreError},
    worker_pool::{PoolSettings, WorkerPool},
};

/// Buffered events per push-channel subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobService>,
}

impl AppState {
    pub fn new(jobs: JobService) -> Self {
        Self {
            jobs: Arc::new(jobs),
        }
    }
}

/// Wire storage, geoprocessing, store, broker and (optionally) executors
/// from configuration. Must run inside a tokio runtime when `run_workers`.
pub fn build_job_service(config: &AppConfig, run_workers: bool) -> Result<JobService, BootstrapError> {
    let storage: Arc<dyn RasterStorage> = match config.s3_settings() {
        Some((bucket, endpoint, access_key, secret_key)) => {
            tracing::info!(bucket = %bucket, "Using S3-compatible raster storage");
            Arc::new(ObjectStorage::new(bucket, endpoint, access_key, secret_key)?)
        }
        None => {
            tracing::info!(root = %config.storage_root, "Using local raster storage");
            Arc::new(LocalStorage::new(&config.storage_root))
        }
    };

    tracing::info!(url = %config.geo_service_url, "Initializing geoprocessing client");
    let geo: Arc<dyn GeoBackend> = Arc::new(GeoServiceClient::new(
        &config.geo_service_url,
        Duration::from_secs(config.geo_timeout_secs),
    )?);

    let collab = Collaborators::new(storage, geo, config.output_prefix.clone());
    let registry = OperationRegistry::with_builtin(collab.clone());

    let (store, broker): (Arc<dyn JobStore>, Arc<dyn Broker>) = match &config.redis_url {
        Some(url) => {
            tracing::info!(namespace = %config.redis_namespace, "Connecting to Redis job store and queue");
            (
                Arc::new(RedisJobStore::new(url, &config.redis_namespace)?),
                Arc::new(RedisBroker::new(url, &config.redis_namespace, config.task_lease())?),
            )
        }
        None => {
            tracing::warn!("REDIS_URL not set, jobs are kept in process memory");
            (
                Arc::new(MemoryJobStore::new()),
                Arc::new(MemoryBroker::new(config.task_lease())),
            )
        }
    };

    let ledger = JobLedger::new(store, EVENT_CAPACITY);
    let pool = run_workers.then(|| {
        WorkerPool::start(
            PoolSettings::from_config(config),
            registry.clone(),
            ledger.clone(),
            broker.clone(),
        )
    });

    Ok(JobService::new(
        registry,
        ledger,
        broker,
        PreviewService::new(collab),
        pool,
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("geoprocessing client: {0}")]
    Geo(#[from] GeoError),

    #[error("job store: {0}")]
    Store(#[from] StoreError),

    #[error("task queue: {0}")]
    Queue(#[from] QueueError),
}
