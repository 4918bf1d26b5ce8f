use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::operation::OperationKind;

/// A job currently owned by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTask {
    pub job_id: Uuid,
    pub operation: OperationKind,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// Counters kept per worker since the pool started.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub skipped: u64,
}

/// One executor as last seen by its own process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub alive: bool,
    pub active_task_count: usize,
    pub task_list: Vec<ActiveTask>,
    pub stats: WorkerStats,
}

/// Executors across every process sharing the store.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub workers: BTreeMap<String, WorkerSnapshot>,
    pub total_active_tasks: usize,
    pub registered_operation_types: Vec<OperationKind>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Summary for the job system health check.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthState,
    pub workers_available: bool,
    pub live_workers: usize,
    pub active_tasks: usize,
    pub queue_depth: Option<u64>,
    pub broker: String,
    pub store: String,
}
