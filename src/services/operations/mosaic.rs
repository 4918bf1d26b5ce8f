use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::operation::{MosaicParams, OperationDescriptor, OperationKind};
use crate::models::raster::{CompatibilityReport, RasterMetadata};
use crate::services::geo::MergeRequest;
use crate::services::operations::{
    milestone, mismatched, Collaborators, OperationContext, OperationError, OperationHandler,
    OperationOutcome,
};

/// Inputs that survived existence and format filtering.
#[derive(Debug, Clone, Default)]
pub struct ValidatedInputs {
    pub paths: Vec<String>,
    pub metadata: Vec<RasterMetadata>,
    pub skipped: Vec<String>,
}

pub struct MosaicHandler {
    collab: Collaborators,
}

impl MosaicHandler {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    /// Drop missing or unreadable rasters, keeping submission order.
    pub async fn filter_inputs(
        &self,
        raster_paths: &[String],
    ) -> Result<ValidatedInputs, OperationError> {
        let mut inputs = ValidatedInputs::default();

        for path in raster_paths {
            if !self.collab.storage.exists(path).await? {
                warn!(path = %path, "Raster file not found, skipping");
                inputs.skipped.push(path.clone());
                continue;
            }
            match self.collab.raster(path).await {
                Ok(meta) => {
                    inputs.paths.push(path.clone());
                    inputs.metadata.push(meta);
                }
                Err(OperationError::InvalidFormat(reason)) | Err(OperationError::NotFound(reason)) => {
                    warn!(path = %path, reason = %reason, "Invalid raster file, skipping");
                    inputs.skipped.push(path.clone());
                }
                Err(other) => return Err(other),
            }
        }

        Ok(inputs)
    }

    pub async fn mosaic(
        &self,
        params: &MosaicParams,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        let c = &self.collab;
        info!(job_id = %ctx.job_id(), inputs = params.raster_paths.len(), method = %params.method, "Starting mosaic operation");

        if params.raster_paths.len() < 2 {
            return Err(OperationError::Validation(
                "At least 2 raster files are required for mosaic".to_string(),
            ));
        }

        let inputs = self.filter_inputs(&params.raster_paths).await?;
        if inputs.paths.len() < 2 {
            return Err(OperationError::Validation(format!(
                "Insufficient valid raster files for mosaic operation: {} of {} usable",
                inputs.paths.len(),
                params.raster_paths.len()
            )));
        }
        info!(job_id = %ctx.job_id(), valid = inputs.paths.len(), "Using valid files for mosaic");
        ctx.progress(milestone::VALIDATED, "Validating input files...").await?;

        // Mismatches are reported, never enforced; the backend reconciles them.
        let report = CompatibilityReport::from_metadata(&inputs.metadata);
        if !report.compatible {
            warn!(job_id = %ctx.job_id(), "Rasters have different properties");
            for w in &report.warnings {
                warn!(job_id = %ctx.job_id(), "  - {w}");
            }
            info!(job_id = %ctx.job_id(), "Proceeding with mosaic despite compatibility warnings");
        }

        let output_path = c.resolve_output(
            &inputs.paths[0],
            &format!("mosaic_{}_{}files", params.method, inputs.paths.len()),
            params.output_name.as_deref(),
        );

        ctx.progress(milestone::COMPUTING, "Creating mosaic...").await?;
        let request = MergeRequest {
            raster_paths: inputs.paths.clone(),
            output_path,
            method: params.method,
        };
        let result_path = ctx.guard(async { Ok(c.geo.merge(&request).await?) }).await?;

        ctx.progress(milestone::FINALIZING, "Finalizing...").await?;
        c.confirm_written(&result_path, "Mosaic").await?;

        info!(job_id = %ctx.job_id(), output = %result_path, "Mosaic completed");
        let mut outcome =
            OperationOutcome::created(result_path, "Mosaic creation completed successfully");
        outcome.warnings = report.warnings;
        Ok(outcome)
    }
}

#[async_trait]
impl OperationHandler for MosaicHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Mosaic
    }

    fn validate(&self, descriptor: &OperationDescriptor) -> Result<(), OperationError> {
        match descriptor {
            OperationDescriptor::Mosaic(p) if p.raster_paths.len() >= 2 => Ok(()),
            OperationDescriptor::Mosaic(_) => Err(OperationError::Validation(
                "At least 2 raster files are required for mosaic".to_string(),
            )),
            other => Err(mismatched(OperationKind::Mosaic, other)),
        }
    }

    async fn run(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        match descriptor {
            OperationDescriptor::Mosaic(params) => self.mosaic(params, ctx).await,
            other => Err(mismatched(OperationKind::Mosaic, other)),
        }
    }
}
