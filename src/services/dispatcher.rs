use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::job::{ErrorKind, Job, JobEvent, JobStatus, JobView, Transition};
use crate::models::operation::{OperationDescriptor, OperationKind};
use crate::models::worker::{HealthState, SystemHealth, WorkerStatus};
use crate::services::preview::PreviewService;
use crate::services::queue::{Broker, QueueError, TaskEnvelope};
use crate::services::registry::{OperationRegistry, ValidationError};
use crate::services::store::{JobLedger, StoreError};
use crate::services::worker_pool::WorkerPool;

/// Upper bound on `list_jobs` page size.
pub const MAX_LIST_LIMIT: usize = 100;

/// Front door of the job system: submission, status, cancellation and
/// introspection. Constructed once at startup and shut down explicitly.
pub struct JobService {
    registry: OperationRegistry,
    ledger: JobLedger,
    broker: Arc<dyn Broker>,
    previews: PreviewService,
    pool: Option<WorkerPool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResult {
    pub job_id: Uuid,
    pub accepted: bool,
    pub message: String,
}

impl JobService {
    pub fn new(
        registry: OperationRegistry,
        ledger: JobLedger,
        broker: Arc<dyn Broker>,
        previews: PreviewService,
        pool: Option<WorkerPool>,
    ) -> Self {
        Self {
            registry,
            ledger,
            broker,
            previews,
            pool,
        }
    }

    /// Validate, record as Pending and enqueue. Nothing is stored when
    /// validation fails.
    pub async fn submit(
        &self,
        operation_type: &str,
        parameters: serde_json::Value,
    ) -> Result<Uuid, DispatchError> {
        let descriptor = self.registry.parse(operation_type, parameters)?;
        self.submit_descriptor(descriptor).await
    }

    pub async fn submit_descriptor(
        &self,
        descriptor: OperationDescriptor,
    ) -> Result<Uuid, DispatchError> {
        self.registry.validate(&descriptor)?;

        let job = Job::new(descriptor);
        self.ledger.create(&job).await?;

        let envelope = TaskEnvelope::new(job.id, job.descriptor.clone());
        if let Err(e) = self.broker.publish(&envelope).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to enqueue job");
            let failed = Transition::Fail {
                kind: ErrorKind::Internal,
                error: format!("Failed to queue job: {e}"),
            };
            if let Err(store_err) = self.ledger.apply(job.id, &failed).await {
                tracing::error!(job_id = %job.id, error = %store_err, "Failed to mark unqueued job as failed");
            }
            return Err(DispatchError::Queue(e));
        }

        let operation: &'static str = job.operation.into();
        metrics::counter!("raster_jobs_submitted_total", "operation" => operation).increment(1);
        tracing::info!(
            job_id = %job.id,
            operation = %job.operation,
            inputs = ?job.descriptor.input_paths(),
            "Job submitted"
        );
        Ok(job.id)
    }

    /// Always returns a view; unknown ids come back with `found = false`.
    pub async fn get_job(&self, job_id: Uuid) -> JobView {
        match self.ledger.get(job_id).await {
            Ok(Some(job)) => job.view(),
            Ok(None) => JobView::not_found(job_id),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Error retrieving job status");
                JobView::unavailable(job_id, &e.to_string())
            }
        }
    }

    /// Request cancellation. Only Pending or Running jobs are accepted.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelResult, DispatchError> {
        match self.ledger.apply(job_id, &Transition::Cancel).await {
            Ok(_) => {
                if let Some(pool) = &self.pool {
                    pool.signal_cancel(job_id).await;
                }
                tracing::info!(job_id = %job_id, "Job cancelled");
                Ok(CancelResult {
                    job_id,
                    accepted: true,
                    message: "Job cancelled".to_string(),
                })
            }
            Err(StoreError::Invalid(e)) => Ok(CancelResult {
                job_id,
                accepted: false,
                message: format!("Job is already {}", e.from),
            }),
            Err(StoreError::NotFound(_)) => Ok(CancelResult {
                job_id,
                accepted: false,
                message: "Job not found".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobView>, DispatchError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let jobs = self.ledger.store().list(status, limit).await?;
        Ok(jobs.iter().map(Job::view).collect())
    }

    /// Executors of every process sharing the store. The embedded pool, if
    /// any, is read directly and wins over its own published snapshots.
    pub async fn get_worker_status(&self) -> WorkerStatus {
        let mut workers = match self.ledger.store().worker_snapshots().await {
            Ok(workers) => workers,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read published worker snapshots");
                Default::default()
            }
        };
        if let Some(pool) = &self.pool {
            workers.extend(pool.status().await.workers);
        }

        WorkerStatus {
            total_active_tasks: workers.values().map(|w| w.active_task_count).sum(),
            workers,
            registered_operation_types: self.registry.kinds(),
        }
    }

    pub async fn health(&self) -> SystemHealth {
        let store_ok = match self.ledger.store().health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Job store health check failed");
                false
            }
        };
        let broker_ok = match self.broker.health().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Broker health check failed");
                false
            }
        };
        let queue_depth = if broker_ok {
            self.broker.depth().await.ok()
        } else {
            None
        };

        let workers = self.get_worker_status().await;
        let live_workers = workers.workers.values().filter(|w| w.alive).count();
        let active_tasks = workers.total_active_tasks;
        let pool_down = self.pool.as_ref().is_some_and(|pool| pool.live_workers() == 0);

        let status = if !(store_ok && broker_ok) {
            HealthState::Unhealthy
        } else if pool_down {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        SystemHealth {
            status,
            workers_available: live_workers > 0,
            live_workers,
            active_tasks,
            queue_depth,
            broker: self.broker.describe(),
            store: self.ledger.store().describe(),
        }
    }

    /// Push channel of job events applied in this process.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.ledger.subscribe()
    }

    pub fn previews(&self) -> &PreviewService {
        &self.previews
    }

    pub fn registered_operations(&self) -> Vec<OperationKind> {
        self.registry.kinds()
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to queue job: {0}")]
    Queue(#[from] QueueError),
}
