use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::operation::{
    ClipParams, MosaicParams, OperationDescriptor, OperationKind, ReprojectParams,
    ResampleParams,
};
use crate::services::operations::{
    ClipHandler, Collaborators, MosaicHandler, OperationHandler, ReprojectHandler,
    ResampleHandler,
};

/// Maps operation kinds to handlers and gatekeeps descriptors before queueing.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    handlers: BTreeMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in raster operations.
    pub fn with_builtin(collab: Collaborators) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClipHandler::new(collab.clone())));
        registry.register(Arc::new(ReprojectHandler::new(collab.clone())));
        registry.register(Arc::new(ResampleHandler::new(collab.clone())));
        registry.register(Arc::new(MosaicHandler::new(collab)));
        registry
    }

    /// Register a handler, replacing any previous handler for the same kind.
    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn resolve(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.handlers.keys().copied().collect()
    }

    /// Build a descriptor from an operation name and an untyped parameter bag.
    pub fn parse(
        &self,
        operation_type: &str,
        parameters: serde_json::Value,
    ) -> Result<OperationDescriptor, ValidationError> {
        let kind = OperationKind::from_str(operation_type.trim())
            .map_err(|_| ValidationError::UnknownOperation(operation_type.to_string()))?;

        let descriptor = match kind {
            OperationKind::Clip => OperationDescriptor::Clip(typed::<ClipParams>(parameters)?),
            OperationKind::Reproject => {
                OperationDescriptor::Reproject(typed::<ReprojectParams>(parameters)?)
            }
            OperationKind::Resample => {
                OperationDescriptor::Resample(typed::<ResampleParams>(parameters)?)
            }
            OperationKind::Mosaic => OperationDescriptor::Mosaic(typed::<MosaicParams>(parameters)?),
        };

        self.validate(&descriptor)?;
        Ok(descriptor)
    }

    pub fn validate(&self, descriptor: &OperationDescriptor) -> Result<(), ValidationError> {
        let kind = descriptor.kind();
        let handler = self
            .resolve(kind)
            .ok_or(ValidationError::Unregistered(kind))?;

        descriptor
            .validate_params()
            .map_err(|report| ValidationError::InvalidParameters(report.to_string().trim().to_string()))?;

        if let Some(name) = output_name(descriptor) {
            check_output_name(name)?;
        }

        handler
            .validate(descriptor)
            .map_err(|e| ValidationError::InvalidParameters(e.to_string()))
    }
}

fn typed<T: serde::de::DeserializeOwned>(parameters: serde_json::Value) -> Result<T, ValidationError> {
    serde_json::from_value(parameters).map_err(|e| ValidationError::InvalidParameters(e.to_string()))
}

fn output_name(descriptor: &OperationDescriptor) -> Option<&str> {
    match descriptor {
        OperationDescriptor::Clip(p) => p.output_name.as_deref(),
        OperationDescriptor::Reproject(p) => p.output_name.as_deref(),
        OperationDescriptor::Resample(p) => p.output_name.as_deref(),
        OperationDescriptor::Mosaic(p) => p.output_name.as_deref(),
    }
}

/// Output names are bare file names; they never escape the output prefix.
fn check_output_name(name: &str) -> Result<(), ValidationError> {
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(ValidationError::InvalidParameters(format!(
            "output_name must be a plain file name, got {name:?}"
        )));
    }
    Ok(())
}

/// Rejection of a descriptor before any job exists.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unsupported operation type: {0}")]
    UnknownOperation(String),

    #[error("No handler registered for operation: {0}")]
    Unregistered(OperationKind),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}
