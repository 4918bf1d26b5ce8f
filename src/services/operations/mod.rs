//! Operation handlers and the contract they share.
//!
//! A handler validates its inputs through the storage and geospatial
//! collaborators, derives a deterministic output path, reports coarse
//! progress through an [`OperationContext`] and returns the produced path.

pub mod clip;
pub mod mosaic;
pub mod reproject;
pub mod resample;

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::ErrorKind;
use crate::models::operation::{OperationDescriptor, OperationKind};
use crate::models::raster::{RasterMetadata, VectorMetadata};
use crate::services::geo::{GeoBackend, GeoError};
use crate::services::storage::{RasterStorage, StorageError};

pub use clip::ClipHandler;
pub use mosaic::MosaicHandler;
pub use reproject::ReprojectHandler;
pub use resample::ResampleHandler;

/// Progress milestones shared by every handler.
pub mod milestone {
    pub const VALIDATED: u8 = 10;
    pub const COMPUTING: u8 = 30;
    pub const FINALIZING: u8 = 90;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidFormat(String),

    #[error("{0}")]
    Processing(String),

    #[error("{0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl OperationError {
    /// Kind recorded on a Failed job. `None` for cancellation, which is not a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Validation(_) => Some(ErrorKind::Validation),
            Self::NotFound(_) => Some(ErrorKind::NotFound),
            Self::InvalidFormat(_) => Some(ErrorKind::InvalidFormat),
            Self::Processing(_) => Some(ErrorKind::Processing),
            Self::Timeout(_) => Some(ErrorKind::Timeout),
            Self::Cancelled => None,
        }
    }
}

impl From<GeoError> for OperationError {
    fn from(e: GeoError) -> Self {
        match e {
            GeoError::NotFound(path) => Self::NotFound(format!("File not found: {path}")),
            GeoError::InvalidFormat { path, reason } => {
                Self::InvalidFormat(format!("Invalid file {path}: {reason}"))
            }
            GeoError::Processing(message) => Self::Processing(message),
            GeoError::Unavailable(message) => Self::Processing(message),
        }
    }
}

impl From<StorageError> for OperationError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(path) => Self::NotFound(format!("File not found: {path}")),
            StorageError::InvalidPath(path) => Self::Validation(format!("Invalid path: {path}")),
            other => Self::Processing(format!("storage error: {other}")),
        }
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub output_path: String,
    /// `false` when the operation was a no-op and returned its input unchanged.
    pub created: bool,
    pub message: String,
    pub warnings: Vec<String>,
}

impl OperationOutcome {
    pub fn created(output_path: String, message: impl Into<String>) -> Self {
        Self {
            output_path,
            created: true,
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn unchanged(input_path: &str, message: impl Into<String>) -> Self {
        Self {
            output_path: input_path.to_string(),
            created: false,
            message: message.into(),
            warnings: Vec::new(),
        }
    }
}

/// Receives progress reports from a running handler.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Fails with [`OperationError::Cancelled`] once the job may no longer progress.
    async fn report(&self, job_id: Uuid, progress: u8, message: &str)
        -> Result<(), OperationError>;
}

/// Discards progress. Used for previews and direct handler calls.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _: Uuid, _: u8, _: &str) -> Result<(), OperationError> {
        Ok(())
    }
}

/// Per-execution handle passed to a handler.
pub struct OperationContext {
    job_id: Uuid,
    cancel: CancellationToken,
    sink: Arc<dyn ProgressSink>,
}

impl OperationContext {
    pub fn new(job_id: Uuid, cancel: CancellationToken, sink: Arc<dyn ProgressSink>) -> Self {
        Self { job_id, cancel, sink }
    }

    /// Context with no progress reporting and a token nobody trips.
    pub fn detached() -> Self {
        Self::new(Uuid::nil(), CancellationToken::new(), Arc::new(NoProgress))
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Return early if the job has been asked to stop.
    pub fn checkpoint(&self) -> Result<(), OperationError> {
        if self.cancel.is_cancelled() {
            Err(OperationError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn progress(&self, progress: u8, message: &str) -> Result<(), OperationError> {
        self.checkpoint()?;
        self.sink.report(self.job_id, progress, message).await
    }

    /// Await a collaborator call, abandoning it if the job is cancelled.
    pub async fn guard<T, F>(&self, call: F) -> Result<T, OperationError>
    where
        F: Future<Output = Result<T, OperationError>> + Send,
        T: Send,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OperationError::Cancelled),
            result = call => result,
        }
    }
}

/// Collaborators every handler works through.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn RasterStorage>,
    pub geo: Arc<dyn GeoBackend>,
    /// Prefix under which outputs are written; empty for the storage root.
    pub output_prefix: String,
}

impl Collaborators {
    pub fn new(
        storage: Arc<dyn RasterStorage>,
        geo: Arc<dyn GeoBackend>,
        output_prefix: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            geo,
            output_prefix: output_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn output_path(&self, file_name: &str) -> String {
        if self.output_prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.output_prefix, file_name)
        }
    }

    /// Explicit output name when given, otherwise `<stem>_<suffix>.tif`.
    pub fn resolve_output(&self, input: &str, suffix: &str, explicit: Option<&str>) -> String {
        match explicit {
            Some(name) => self.output_path(name),
            None => self.output_path(&derived_name(input, suffix)),
        }
    }

    pub async fn require_exists(&self, path: &str, what: &str) -> Result<(), OperationError> {
        if self.storage.exists(path).await? {
            Ok(())
        } else {
            Err(OperationError::NotFound(format!("{what} file not found: {path}")))
        }
    }

    pub async fn raster(&self, path: &str) -> Result<RasterMetadata, OperationError> {
        self.geo.raster_metadata(path).await.map_err(|e| match e {
            GeoError::InvalidFormat { reason, .. } => {
                OperationError::InvalidFormat(format!("Invalid raster file {path}: {reason}"))
            }
            other => other.into(),
        })
    }

    pub async fn vector(&self, path: &str) -> Result<VectorMetadata, OperationError> {
        let meta = self.geo.vector_metadata(path).await.map_err(|e| match e {
            GeoError::InvalidFormat { reason, .. } => {
                OperationError::InvalidFormat(format!("Invalid vector file {path}: {reason}"))
            }
            other => other.into(),
        })?;

        if meta.feature_count == 0 {
            return Err(OperationError::InvalidFormat(format!(
                "Invalid vector file {path}: no features"
            )));
        }
        Ok(meta)
    }

    pub async fn same_crs(&self, a: &str, b: &str) -> Result<bool, OperationError> {
        Ok(self.geo.crs_equivalent(a, b).await?)
    }

    /// Fail if the backend reported success but nothing was written.
    pub async fn confirm_written(&self, path: &str, what: &str) -> Result<(), OperationError> {
        if self.storage.exists(path).await? {
            Ok(())
        } else {
            Err(OperationError::Processing(format!(
                "{what} file was not created successfully"
            )))
        }
    }
}

/// `<stem>_<suffix>.tif` for an input path.
pub fn derived_name(input: &str, suffix: &str) -> String {
    let stem = Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    format!("{stem}_{suffix}.tif")
}

/// A transformation the worker pool can execute.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Cheap, side-effect-free checks run at submission time.
    fn validate(&self, _descriptor: &OperationDescriptor) -> Result<(), OperationError> {
        Ok(())
    }

    async fn run(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError>;
}

pub(crate) fn mismatched(expected: OperationKind, got: &OperationDescriptor) -> OperationError {
    OperationError::Validation(format!(
        "{expected} handler cannot run a {} descriptor",
        got.kind()
    ))
}
