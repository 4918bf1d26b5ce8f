//! Executor pool: N tokio tasks pulling envelopes off the broker and driving
//! operation handlers to a terminal job state.
//!
//! Each executor owns one job at a time. The handler runs in its own spawned
//! task so a panic or a hard-limit abort never takes the executor down. The
//! delivery is acked only after the outcome is recorded; anything that dies
//! in between is redelivered once its lease expires.

use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::{ErrorKind, JobStatus, Transition};
use crate::models::worker::{ActiveTask, WorkerSnapshot, WorkerStats, WorkerStatus};
use crate::services::operations::{OperationContext, OperationError, OperationOutcome, ProgressSink};
use crate::services::queue::{Broker, Delivery, TaskEnvelope};
use crate::services::registry::OperationRegistry;
use crate::services::store::{JobLedger, StoreError};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub concurrency: usize,
    /// Trips the job's cancellation token; the handler is expected to wind down.
    pub soft_limit: Duration,
    /// Aborts the handler task outright.
    pub hard_limit: Duration,
    pub max_deliveries: u32,
    pub poll_interval: Duration,
    pub cancel_check_interval: Duration,
    pub reclaim_interval: Duration,
    /// How often snapshots are published to the store; they expire after three intervals.
    pub heartbeat_interval: Duration,
    pub worker_name: String,
}

impl PoolSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.max_concurrent_jobs.max(1),
            soft_limit: config.soft_time_limit(),
            hard_limit: config.hard_time_limit(),
            max_deliveries: config.max_deliveries.max(1),
            poll_interval: config.poll_interval(),
            cancel_check_interval: config.cancel_check_interval(),
            reclaim_interval: config.reclaim_interval(),
            heartbeat_interval: config.worker_heartbeat_interval(),
            worker_name: config.worker_name.clone(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            soft_limit: Duration::from_secs(7140),
            hard_limit: Duration::from_secs(7200),
            max_deliveries: 3,
            poll_interval: Duration::from_secs(1),
            cancel_check_interval: Duration::from_secs(2),
            reclaim_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            worker_name: "worker".to_string(),
        }
    }
}

/// How a handler run ended, before it is written to the store.
#[derive(Debug)]
enum Finish {
    Succeeded(OperationOutcome),
    Failed { kind: ErrorKind, error: String },
    Cancelled,
}

struct Slot {
    name: String,
    alive: AtomicBool,
    active: RwLock<Option<ActiveTask>>,
    stats: RwLock<WorkerStats>,
}

impl Slot {
    fn new(name: String) -> Self {
        Self {
            name,
            alive: AtomicBool::new(false),
            active: RwLock::new(None),
            stats: RwLock::new(WorkerStats::default()),
        }
    }
}

struct Inner {
    settings: PoolSettings,
    registry: OperationRegistry,
    ledger: JobLedger,
    broker: Arc<dyn Broker>,
    slots: Vec<Slot>,
    running: RwLock<HashMap<Uuid, CancellationToken>>,
    /// Stop reserving new work.
    shutdown: CancellationToken,
    /// Stop background loops once executors have drained.
    halt: CancellationToken,
}

pub struct WorkerPool {
    inner: Arc<Inner>,
    executors: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn executors, the cancellation watcher and the lease reaper.
    pub fn start(
        settings: PoolSettings,
        registry: OperationRegistry,
        ledger: JobLedger,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let slots = (0..settings.concurrency.max(1))
            .map(|i| Slot::new(format!("{}-{}", settings.worker_name, i)))
            .collect();

        let inner = Arc::new(Inner {
            settings,
            registry,
            ledger,
            broker,
            slots,
            running: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            halt: CancellationToken::new(),
        });

        let executors = (0..inner.slots.len())
            .map(|i| tokio::spawn(inner.clone().run_executor(i)))
            .collect();
        let background = vec![
            tokio::spawn(inner.clone().watch_cancellations()),
            tokio::spawn(inner.clone().reap_expired_leases()),
            tokio::spawn(inner.clone().publish_heartbeats()),
        ];

        tracing::info!(
            executors = inner.slots.len(),
            soft_limit_secs = inner.settings.soft_limit.as_secs(),
            hard_limit_secs = inner.settings.hard_limit.as_secs(),
            operations = ?inner.registry.kinds(),
            "Worker pool started"
        );

        Self {
            inner,
            executors: Mutex::new(executors),
            background: Mutex::new(background),
        }
    }

    /// Executors of this pool only.
    pub async fn status(&self) -> WorkerStatus {
        let workers = self.inner.snapshots().await;
        WorkerStatus {
            total_active_tasks: workers.values().map(|w| w.active_task_count).sum(),
            workers,
            registered_operation_types: self.inner.registry.kinds(),
        }
    }

    pub fn live_workers(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|s| s.alive.load(Ordering::SeqCst))
            .count()
    }

    /// Counters summed over every executor.
    pub async fn totals(&self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for slot in &self.inner.slots {
            let s = slot.stats.read().await;
            total.processed += s.processed;
            total.succeeded += s.succeeded;
            total.failed += s.failed;
            total.cancelled += s.cancelled;
            total.timed_out += s.timed_out;
            total.skipped += s.skipped;
        }
        total
    }

    /// Trip the token of a job running in this process. Returns whether it was found.
    pub async fn signal_cancel(&self, job_id: Uuid) -> bool {
        match self.inner.running.read().await.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop reserving work and wait for in-flight jobs, bounded by the hard limit.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Worker pool shutting down, draining in-flight jobs");
        self.inner.shutdown.cancel();

        let executors = std::mem::take(&mut *self.executors.lock().await);
        let grace = self.inner.settings.hard_limit + self.inner.settings.poll_interval * 2;
        let drained = tokio::time::timeout(grace, async {
            for handle in executors {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Executor task ended abnormally");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(grace_secs = grace.as_secs(), "Executors did not drain in time");
        }

        self.inner.halt.cancel();
        for handle in std::mem::take(&mut *self.background.lock().await) {
            let _ = handle.await;
        }
        tracing::info!("Worker pool stopped");
    }
}

impl Inner {
    async fn snapshots(&self) -> BTreeMap<String, WorkerSnapshot> {
        let mut workers = BTreeMap::new();
        for slot in &self.slots {
            let task_list: Vec<ActiveTask> = slot.active.read().await.iter().cloned().collect();
            workers.insert(
                slot.name.clone(),
                WorkerSnapshot {
                    alive: slot.alive.load(Ordering::SeqCst),
                    active_task_count: task_list.len(),
                    task_list,
                    stats: slot.stats.read().await.clone(),
                },
            );
        }
        workers
    }

    async fn run_executor(self: Arc<Self>, index: usize) {
        let slot = &self.slots[index];
        slot.alive.store(true, Ordering::SeqCst);
        tracing::debug!(worker = %slot.name, "Executor started");

        while !self.shutdown.is_cancelled() {
            match self.broker.reserve(self.settings.poll_interval).await {
                Ok(Some(delivery)) => self.execute(slot, delivery).await,
                Ok(None) => tracing::trace!(worker = %slot.name, "No tasks available"),
                Err(e) => {
                    tracing::error!(worker = %slot.name, error = %e, "Failed to reserve task, will retry");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }

        slot.alive.store(false, Ordering::SeqCst);
        tracing::debug!(worker = %slot.name, "Executor stopped");
    }

    async fn execute(&self, slot: &Slot, delivery: Delivery) {
        let envelope = &delivery.envelope;
        let job_id = envelope.job_id;
        let kind = envelope.descriptor.kind();

        if envelope.attempt > self.settings.max_deliveries {
            tracing::warn!(
                job_id = %job_id,
                attempt = envelope.attempt,
                max_deliveries = self.settings.max_deliveries,
                "Task exceeded maximum deliveries"
            );
            let transition = Transition::Fail {
                kind: ErrorKind::Processing,
                error: format!(
                    "delivery attempts exhausted: task was delivered {} times without completing",
                    self.settings.max_deliveries
                ),
            };
            match self.ledger.apply(job_id, &transition).await {
                Ok(_) => {
                    let mut stats = slot.stats.write().await;
                    stats.processed += 1;
                    stats.failed += 1;
                }
                Err(StoreError::Invalid(_)) | Err(StoreError::NotFound(_)) => {
                    slot.stats.write().await.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Could not fail exhausted job, leaving task leased");
                    return;
                }
            }
            self.ack(&delivery).await;
            return;
        }

        match self.ledger.get(job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => {
                tracing::info!(job_id = %job_id, status = %job.status, "Skipping task for finished job");
                slot.stats.write().await.skipped += 1;
                self.ack(&delivery).await;
                return;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Dropping task for unknown job");
                slot.stats.write().await.skipped += 1;
                self.ack(&delivery).await;
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not read job record, leaving task leased");
                return;
            }
        }

        let start = Transition::Start {
            attempt: envelope.attempt,
            message: format!("Starting {kind} operation..."),
        };
        match self.ledger.apply(job_id, &start).await {
            Ok(_) => {}
            Err(StoreError::Invalid(e)) => {
                tracing::info!(job_id = %job_id, status = %e.from, attempt = envelope.attempt, "Job can no longer be started, skipping");
                slot.stats.write().await.skipped += 1;
                self.ack(&delivery).await;
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not start job, leaving task leased");
                return;
            }
        }

        tracing::info!(
            job_id = %job_id,
            operation = %kind,
            attempt = envelope.attempt,
            worker = %slot.name,
            "Processing job"
        );

        let token = CancellationToken::new();
        self.running.write().await.insert(job_id, token.clone());
        *slot.active.write().await = Some(ActiveTask {
            job_id,
            operation: kind,
            attempt: envelope.attempt,
            started_at: chrono::Utc::now(),
        });

        let started = Instant::now();
        let finish = self.run_handler(envelope, token).await;
        let elapsed = started.elapsed();
        let timed_out = matches!(finish, Finish::Failed { kind: ErrorKind::Timeout, .. });

        let recorded = self.record(job_id, finish).await;

        self.running.write().await.remove(&job_id);
        *slot.active.write().await = None;

        let Some(status) = recorded else {
            return;
        };

        {
            let mut stats = slot.stats.write().await;
            stats.processed += 1;
            match status {
                JobStatus::Success => stats.succeeded += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                JobStatus::Failed => {
                    stats.failed += 1;
                    if timed_out {
                        stats.timed_out += 1;
                    }
                }
                JobStatus::Pending | JobStatus::Running => {}
            }
        }

        let operation: &'static str = kind.into();
        metrics::counter!(
            "raster_jobs_finished_total",
            "status" => status.to_string(),
            "operation" => operation
        )
        .increment(1);
        metrics::histogram!("raster_job_duration_seconds", "operation" => operation)
            .record(elapsed.as_secs_f64());

        tracing::info!(
            job_id = %job_id,
            status = %status,
            duration_ms = elapsed.as_millis() as u64,
            "Job finished"
        );

        self.ack(&delivery).await;
    }

    async fn run_handler(&self, envelope: &TaskEnvelope, token: CancellationToken) -> Finish {
        let job_id = envelope.job_id;
        let kind = envelope.descriptor.kind();
        let Some(handler) = self.registry.resolve(kind) else {
            return Finish::Failed {
                kind: ErrorKind::Validation,
                error: format!("No handler registered for operation: {kind}"),
            };
        };

        let sink = Arc::new(LedgerProgress {
            ledger: self.ledger.clone(),
            cancel: token.clone(),
        });
        let ctx = OperationContext::new(job_id, token.clone(), sink);
        let descriptor = envelope.descriptor.clone();
        let mut task = tokio::spawn(async move { handler.run(&descriptor, &ctx).await });

        let soft = tokio::time::sleep(self.settings.soft_limit);
        let hard = tokio::time::sleep(self.settings.hard_limit);
        tokio::pin!(soft, hard);
        let mut soft_fired = false;

        loop {
            tokio::select! {
                joined = &mut task => {
                    return match joined {
                        Ok(Ok(outcome)) => Finish::Succeeded(outcome),
                        Ok(Err(OperationError::Cancelled)) if soft_fired => Finish::Failed {
                            kind: ErrorKind::Timeout,
                            error: format!(
                                "Job exceeded soft time limit of {}s",
                                self.settings.soft_limit.as_secs()
                            ),
                        },
                        Ok(Err(OperationError::Cancelled)) => Finish::Cancelled,
                        Ok(Err(e)) => Finish::Failed {
                            kind: e.error_kind().unwrap_or(ErrorKind::Internal),
                            error: e.to_string(),
                        },
                        Err(e) if e.is_panic() => {
                            let message = panic_message(e.into_panic());
                            tracing::error!(job_id = %job_id, panic = %message, "Operation panicked");
                            Finish::Failed {
                                kind: ErrorKind::Internal,
                                error: format!("Operation panicked: {message}"),
                            }
                        }
                        Err(e) => Finish::Failed {
                            kind: ErrorKind::Internal,
                            error: format!("Operation task ended unexpectedly: {e}"),
                        },
                    };
                }
                _ = &mut soft, if !soft_fired => {
                    soft_fired = true;
                    tracing::warn!(job_id = %job_id, "Soft time limit reached, asking operation to stop");
                    token.cancel();
                }
                _ = &mut hard => {
                    task.abort();
                    tracing::error!(job_id = %job_id, "Hard time limit reached, operation aborted");
                    return Finish::Failed {
                        kind: ErrorKind::Timeout,
                        error: format!(
                            "Job exceeded hard time limit of {}s",
                            self.settings.hard_limit.as_secs()
                        ),
                    };
                }
            }
        }
    }

    /// Write the outcome. Returns the job's final status, or `None` when
    /// nothing could be recorded and the task should stay leased.
    async fn record(&self, job_id: Uuid, finish: Finish) -> Option<JobStatus> {
        let transition = match finish {
            Finish::Succeeded(outcome) => {
                for warning in &outcome.warnings {
                    tracing::warn!(job_id = %job_id, warning = %warning, "Operation warning");
                }
                Transition::Succeed {
                    result_path: outcome.output_path,
                    message: outcome.message,
                }
            }
            Finish::Failed { kind, error } => {
                tracing::error!(job_id = %job_id, error_kind = %kind, error = %error, "Job failed");
                Transition::Fail { kind, error }
            }
            Finish::Cancelled => Transition::Cancel,
        };

        match self.ledger.apply(job_id, &transition).await {
            Ok(job) => Some(job.status),
            Err(StoreError::Invalid(e)) => {
                tracing::info!(job_id = %job_id, status = %e.from, "Job already finished, outcome discarded");
                Some(e.from)
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(job_id = %job_id, "Job record vanished before outcome was recorded");
                Some(JobStatus::Failed)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                let fallback = Transition::Fail {
                    kind: ErrorKind::Internal,
                    error: format!("Failed to record job outcome: {e}"),
                };
                match self.ledger.apply(job_id, &fallback).await {
                    Ok(job) => Some(job.status),
                    Err(StoreError::Invalid(e)) => Some(e.from),
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Leaving task leased for redelivery");
                        None
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.broker.ack(delivery).await {
            tracing::warn!(job_id = %delivery.envelope.job_id, error = %e, "Failed to ack task");
        }
    }

    /// Cancellation set by another process only shows up in the store.
    async fn watch_cancellations(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.cancel_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.halt.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let running: Vec<(Uuid, CancellationToken)> = self
                .running
                .read()
                .await
                .iter()
                .filter(|(_, token)| !token.is_cancelled())
                .map(|(id, token)| (*id, token.clone()))
                .collect();

            for (job_id, token) in running {
                match self.ledger.get(job_id).await {
                    Ok(Some(job)) if job.status == JobStatus::Cancelled => {
                        tracing::info!(job_id = %job_id, "Job cancelled externally, stopping operation");
                        token.cancel();
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Cancellation check failed"),
                }
            }
        }
    }

    async fn reap_expired_leases(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.settings.reclaim_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.halt.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.broker.reclaim_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(requeued = n, "Requeued tasks with expired leases"),
                Err(e) => tracing::warn!(error = %e, "Lease reclaim failed"),
            }
            if let Ok(depth) = self.broker.depth().await {
                metrics::gauge!("raster_queue_depth").set(depth as f64);
            }
        }
    }

    /// Make this pool's executors visible to processes without one.
    async fn publish_heartbeats(self: Arc<Self>) {
        let ttl = self.settings.heartbeat_interval * 3;
        let mut ticker = tokio::time::interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let halted = tokio::select! {
                _ = self.halt.cancelled() => true,
                _ = ticker.tick() => false,
            };

            // The last publish after halt reports the executors as stopped.
            let workers = self.snapshots().await;
            if let Err(e) = self.ledger.store().publish_workers(&workers, ttl).await {
                tracing::warn!(error = %e, "Failed to publish worker snapshots");
            }
            if halted {
                break;
            }
        }
    }
}

/// Writes handler progress to the store. A rejected update means the job
/// left Running (cancelled elsewhere), so the handler is told to stop.
struct LedgerProgress {
    ledger: JobLedger,
    cancel: CancellationToken,
}

#[async_trait]
impl ProgressSink for LedgerProgress {
    async fn report(&self, job_id: Uuid, progress: u8, message: &str) -> Result<(), OperationError> {
        let transition = Transition::Progress {
            progress,
            message: message.to_string(),
        };
        match self.ledger.apply(job_id, &transition).await {
            Ok(_) => Ok(()),
            Err(StoreError::Invalid(e)) => {
                tracing::info!(job_id = %job_id, status = %e.from, "Job is no longer running, stopping operation");
                self.cancel.cancel();
                Err(OperationError::Cancelled)
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Progress update not recorded");
                Ok(())
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
