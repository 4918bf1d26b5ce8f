//! Job records keyed by id, with lifecycle-checked transitions.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{InvalidTransition, Job, JobEvent, JobStatus, Transition};
use crate::models::worker::WorkerSnapshot;

pub use self::memory::MemoryJobStore;
pub use self::redis::RedisJobStore;

/// Persistence for job records.
///
/// `transition` is the only way to change a stored record. Implementations
/// serialize transitions per job id and apply them through [`Job::apply`],
/// so the lifecycle holds no matter how many processes write concurrently.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new record. Fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically apply `transition` and return the updated record.
    async fn transition(&self, id: Uuid, transition: &Transition) -> Result<Job, StoreError>;

    /// Newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Record executor snapshots keyed by worker name. Each entry disappears
    /// unless republished within `ttl`.
    async fn publish_workers(
        &self,
        workers: &BTreeMap<String, WorkerSnapshot>,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Unexpired snapshots from every process.
    async fn worker_snapshots(&self) -> Result<BTreeMap<String, WorkerSnapshot>, StoreError>;

    async fn health(&self) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error(transparent)]
    Invalid(#[from] InvalidTransition),

    #[error("job {0} is being updated concurrently, giving up")]
    Conflict(Uuid),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store plus the in-process push channel. Every write that goes through the
/// ledger is published as a [`JobEvent`] after it is applied.
#[derive(Clone)]
pub struct JobLedger {
    store: Arc<dyn JobStore>,
    events: broadcast::Sender<JobEvent>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn create(&self, job: &Job) -> Result<(), StoreError> {
        self.store.insert(job).await?;
        self.publish(job);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        self.store.get(id).await
    }

    pub async fn apply(&self, id: Uuid, transition: &Transition) -> Result<Job, StoreError> {
        let job = self.store.transition(id, transition).await?;
        self.publish(&job);
        Ok(job)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn publish(&self, job: &Job) {
        // No subscribers is the common case.
        let _ = self.events.send(JobEvent::from(job));
    }
}
