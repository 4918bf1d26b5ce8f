use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::models::operation::{OperationDescriptor, OperationKind};

/// Status of a raster job in the async queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// Category of a failure recorded on a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidFormat,
    Processing,
    Timeout,
    Internal,
}

/// A requested change to a job record. The store applies these through
/// [`Job::apply`], which enforces the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// Take ownership for a delivery attempt.
    Start { attempt: u32, message: String },
    Progress { progress: u8, message: String },
    Succeed { result_path: String, message: String },
    Fail { kind: ErrorKind, error: String },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid transition: cannot {action} a job that is {from}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub action: &'static str,
}

/// A raster job tracked end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub operation: OperationKind,
    pub descriptor: OperationDescriptor,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub result_path: Option<String>,
    pub attempt: u32,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(descriptor: OperationDescriptor) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            operation: descriptor.kind(),
            descriptor,
            status: JobStatus::Pending,
            progress: 0,
            message: "Job is waiting to be processed".to_string(),
            error: None,
            error_kind: None,
            result_path: None,
            attempt: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `transition` in place, bumping `version` and `updated_at`.
    /// On error the record is left untouched.
    pub fn apply(&mut self, transition: &Transition) -> Result<(), InvalidTransition> {
        use JobStatus::*;

        match (self.status, transition) {
            (Pending, Transition::Start { attempt, message }) => {
                self.status = Running;
                self.attempt = *attempt;
                self.message = message.clone();
            }
            // Redelivery after the previous owner vanished without acking.
            (Running, Transition::Start { attempt, message }) if *attempt > self.attempt => {
                self.attempt = *attempt;
                self.message = message.clone();
            }
            (Running, Transition::Progress { progress, message }) => {
                self.progress = self.progress.max((*progress).min(100));
                self.message = message.clone();
            }
            (Running, Transition::Succeed { result_path, message }) => {
                self.status = Success;
                self.progress = 100;
                self.result_path = Some(result_path.clone());
                self.message = message.clone();
            }
            (Pending | Running, Transition::Fail { kind, error }) => {
                self.status = Failed;
                self.error = Some(error.clone());
                self.error_kind = Some(*kind);
                self.message = format!("{} failed: {error}", operation_label(self.operation));
            }
            (Pending | Running, Transition::Cancel) => {
                self.status = Cancelled;
                self.message = "Job was cancelled".to_string();
            }
            (from, t) => {
                return Err(InvalidTransition {
                    from,
                    action: transition_action(t),
                })
            }
        }

        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.id,
            found: true,
            operation: Some(self.operation),
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            error: self.error.clone(),
            error_kind: self.error_kind,
            result_path: self.result_path.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

fn transition_action(t: &Transition) -> &'static str {
    match t {
        Transition::Start { .. } => "start",
        Transition::Progress { .. } => "report progress on",
        Transition::Succeed { .. } => "complete",
        Transition::Fail { .. } => "fail",
        Transition::Cancel => "cancel",
    }
}

fn operation_label(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Clip => "Clip operation",
        OperationKind::Reproject => "Reprojection",
        OperationKind::Resample => "Resampling",
        OperationKind::Mosaic => "Mosaic creation",
    }
}

/// Snapshot of a job as served to status readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    /// `false` when no record exists for `job_id`.
    pub found: bool,
    pub operation: Option<OperationKind>,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub result_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl JobView {
    /// Well-formed view for an id the store has never seen.
    pub fn not_found(job_id: Uuid) -> Self {
        Self {
            job_id,
            found: false,
            operation: None,
            status: JobStatus::Failed,
            progress: 0,
            message: "Job not found".to_string(),
            error: Some(format!("no job with id {job_id}")),
            error_kind: Some(ErrorKind::NotFound),
            result_path: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// View returned when the store itself could not be read.
    pub fn unavailable(job_id: Uuid, reason: &str) -> Self {
        Self {
            message: "Error retrieving job status".to_string(),
            error: Some(reason.to_string()),
            error_kind: Some(ErrorKind::Internal),
            ..Self::not_found(job_id)
        }
    }
}

/// Published on the push channel after every applied transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl From<&Job> for JobEvent {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            at: job.updated_at,
        }
    }
}
