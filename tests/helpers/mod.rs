//! Test helpers: an in-process geoprocessing fake and job-system wiring
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use raster_orchestrator::models::job::JobView;
use raster_orchestrator::models::raster::{RasterMetadata, VectorMetadata};
use raster_orchestrator::services::{
    dispatcher::JobService,
    geo::{
        GeoBackend, GeoError, MaskRequest, MergeRequest, ReprojectRequest, ResampleRequest,
        VectorReprojectRequest,
    },
    operations::Collaborators,
    preview::PreviewService,
    queue::MemoryBroker,
    registry::OperationRegistry,
    storage::{LocalStorage, RasterStorage},
    store::{JobLedger, JobStore, MemoryJobStore},
    worker_pool::{PoolSettings, WorkerPool},
};

use crate::fixtures::RasterFixture;

/// Geoprocessing fake. Metadata comes from a catalogue filled by the test;
/// every operation writes a placeholder file to storage and catalogues it.
pub struct FakeGeoBackend {
    storage: Arc<LocalStorage>,
    rasters: Mutex<HashMap<String, RasterMetadata>>,
    vectors: Mutex<HashMap<String, VectorMetadata>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, GeoError>>,
    panics: Mutex<Vec<&'static str>>,
    delay: Mutex<Option<Duration>>,
    skip_write: Mutex<bool>,
    merges: Mutex<Vec<MergeRequest>>,
    resamples: Mutex<Vec<ResampleRequest>>,
}

impl FakeGeoBackend {
    pub fn new(storage: Arc<LocalStorage>) -> Self {
        Self {
            storage,
            rasters: Mutex::new(HashMap::new()),
            vectors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            skip_write: Mutex::new(false),
            merges: Mutex::new(Vec::new()),
            resamples: Mutex::new(Vec::new()),
        }
    }

    pub fn register_raster(&self, path: &str, meta: RasterMetadata) {
        self.rasters.lock().unwrap().insert(path.to_string(), meta);
    }

    pub fn register_vector(&self, path: &str, meta: VectorMetadata) {
        self.vectors.lock().unwrap().insert(path.to_string(), meta);
    }

    /// Make `op` ("mask", "merge", ...) return `error`.
    pub fn fail(&self, op: &'static str, error: GeoError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    pub fn panic_in(&self, op: &'static str) {
        self.panics.lock().unwrap().push(op);
    }

    /// Every processing call sleeps this long first.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Report success without writing the output file.
    pub fn skip_writes(&self) {
        *self.skip_write.lock().unwrap() = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn merges(&self) -> Vec<MergeRequest> {
        self.merges.lock().unwrap().clone()
    }

    pub fn resamples(&self) -> Vec<ResampleRequest> {
        self.resamples.lock().unwrap().clone()
    }

    async fn enter(&self, op: &'static str) -> Result<(), GeoError> {
        self.calls.lock().unwrap().push(op.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics.lock().unwrap().contains(&op) {
            panic!("fake backend panicked in {op}");
        }
        match self.failures.lock().unwrap().get(op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn produce(&self, output: &str, meta: Option<RasterMetadata>) -> Result<String, GeoError> {
        let skip = *self.skip_write.lock().unwrap();
        if !skip {
            self.storage
                .write(output, b"GTiff")
                .await
                .map_err(|e| GeoError::Processing(e.to_string()))?;
        }
        if let Some(meta) = meta {
            self.register_raster(output, meta);
        }
        Ok(output.to_string())
    }

    fn raster_meta(&self, path: &str) -> Option<RasterMetadata> {
        self.rasters.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl GeoBackend for FakeGeoBackend {
    async fn raster_metadata(&self, path: &str) -> Result<RasterMetadata, GeoError> {
        if let Some(meta) = self.raster_meta(path) {
            return Ok(meta);
        }
        match self.storage.exists(path).await {
            Ok(true) => Err(GeoError::InvalidFormat {
                path: path.to_string(),
                reason: "not recognized as a supported file format".to_string(),
            }),
            _ => Err(GeoError::NotFound(path.to_string())),
        }
    }

    async fn vector_metadata(&self, path: &str) -> Result<VectorMetadata, GeoError> {
        if let Some(meta) = self.vectors.lock().unwrap().get(path).cloned() {
            return Ok(meta);
        }
        Err(GeoError::InvalidFormat {
            path: path.to_string(),
            reason: "no vector layer".to_string(),
        })
    }

    async fn mask(&self, request: &MaskRequest) -> Result<String, GeoError> {
        self.enter("mask").await?;
        let meta = self.raster_meta(&request.raster_path);
        self.produce(&request.output_path, meta).await
    }

    async fn reproject_raster(&self, request: &ReprojectRequest) -> Result<String, GeoError> {
        self.enter("reproject_raster").await?;
        let meta = self.raster_meta(&request.raster_path).map(|mut m| {
            m.crs = request.target_crs.clone();
            m
        });
        self.produce(&request.output_path, meta).await
    }

    async fn reproject_vector(&self, request: &VectorReprojectRequest) -> Result<String, GeoError> {
        self.enter("reproject_vector").await?;
        let meta = self.vectors.lock().unwrap().get(&request.vector_path).cloned();
        if let Some(mut meta) = meta {
            meta.crs = request.target_crs.clone();
            self.register_vector(&request.output_path, meta);
        }
        self.storage
            .write(&request.output_path, b"{}")
            .await
            .map_err(|e| GeoError::Processing(e.to_string()))?;
        Ok(request.output_path.clone())
    }

    async fn resample(&self, request: &ResampleRequest) -> Result<String, GeoError> {
        self.enter("resample").await?;
        self.resamples.lock().unwrap().push(request.clone());
        let meta = self.raster_meta(&request.raster_path).map(|mut m| {
            m.width = request.width;
            m.height = request.height;
            m.transform = request.transform;
            m
        });
        self.produce(&request.output_path, meta).await
    }

    async fn merge(&self, request: &MergeRequest) -> Result<String, GeoError> {
        self.enter("merge").await?;
        self.merges.lock().unwrap().push(request.clone());
        let meta = request.raster_paths.first().and_then(|p| self.raster_meta(p));
        self.produce(&request.output_path, meta).await
    }
}

/// Temp storage root, fake backend and the collaborators wired over them.
pub struct TestEnv {
    pub dir: TempDir,
    pub storage: Arc<LocalStorage>,
    pub geo: Arc<FakeGeoBackend>,
    pub collab: Collaborators,
}

impl TestEnv {
    /// Outputs land at the storage root.
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    pub fn with_prefix(prefix: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let storage = Arc::new(LocalStorage::new(dir.path()));
        let geo = Arc::new(FakeGeoBackend::new(storage.clone()));
        let collab = Collaborators::new(storage.clone(), geo.clone(), prefix);
        Self {
            dir,
            storage,
            geo,
            collab,
        }
    }

    pub async fn add_raster(&self, fixture: &RasterFixture) {
        self.storage
            .write(fixture.path, b"GTiff")
            .await
            .expect("write fixture");
        self.geo.register_raster(fixture.path, fixture.metadata());
    }

    pub async fn add_vector(&self, path: &str, meta: VectorMetadata) {
        self.storage.write(path, b"{}").await.expect("write vector");
        self.geo.register_vector(path, meta);
    }

    /// A file that exists but no driver can open.
    pub async fn add_corrupt(&self, path: &str) {
        self.storage
            .write(path, b"not a raster")
            .await
            .expect("write corrupt file");
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.storage.exists(path).await.expect("exists")
    }

    pub fn registry(&self) -> OperationRegistry {
        OperationRegistry::with_builtin(self.collab.clone())
    }

    /// Job service over in-memory store and broker with an embedded pool.
    pub fn service(&self, settings: PoolSettings) -> JobService {
        let (store, broker) = memory_backend();
        self.service_on(store, broker, Some(settings))
    }

    /// Job service that queues but never executes.
    pub fn service_without_workers(&self) -> JobService {
        let (store, broker) = memory_backend();
        self.service_on(store, broker, None)
    }

    /// Job service over a given store and broker, so several services can
    /// stand in for separate API and worker processes.
    pub fn service_on(
        &self,
        store: Arc<dyn JobStore>,
        broker: Arc<MemoryBroker>,
        settings: Option<PoolSettings>,
    ) -> JobService {
        let ledger = JobLedger::new(store, 256);
        let registry = self.registry();
        let pool = settings.map(|settings| {
            WorkerPool::start(settings, registry.clone(), ledger.clone(), broker.clone())
        });
        JobService::new(
            registry,
            ledger,
            broker,
            PreviewService::new(self.collab.clone()),
            pool,
        )
    }
}

pub fn memory_backend() -> (Arc<dyn JobStore>, Arc<MemoryBroker>) {
    (
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryBroker::new(Duration::from_secs(60))),
    )
}

pub fn fast_settings() -> PoolSettings {
    PoolSettings {
        concurrency: 2,
        poll_interval: Duration::from_millis(20),
        cancel_check_interval: Duration::from_millis(20),
        reclaim_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(20),
        ..PoolSettings::default()
    }
}

/// Poll until the job reaches a terminal state.
pub async fn wait_for_terminal(service: &JobService, job_id: Uuid) -> JobView {
    for _ in 0..500 {
        let view = service.get_job(job_id).await;
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish in time");
}

pub async fn wait_for_status(
    service: &JobService,
    job_id: Uuid,
    status: raster_orchestrator::models::job::JobStatus,
) -> JobView {
    for _ in 0..500 {
        let view = service.get_job(job_id).await;
        if view.status == status {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {status}");
}
