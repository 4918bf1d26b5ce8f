use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::operation::{OperationDescriptor, OperationKind, ResampleParams};
use crate::models::raster::{GeoTransform, RasterMetadata};
use crate::services::geo::ResampleRequest;
use crate::services::operations::{
    milestone, mismatched, Collaborators, OperationContext, OperationError, OperationHandler,
    OperationOutcome,
};

/// Relative distance under which a target resolution counts as unchanged.
pub const RESOLUTION_TOLERANCE: f64 = 0.01;

/// Output grid for a resample onto `target_resolution`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleGrid {
    pub scale_x: f64,
    pub scale_y: f64,
    pub width: u64,
    pub height: u64,
    pub transform: GeoTransform,
}

impl ResampleGrid {
    /// Scale factors are `current / target` per axis; dimensions truncate.
    pub fn compute(source: &RasterMetadata, target_resolution: f64) -> Result<Self, OperationError> {
        if !(target_resolution.is_finite() && target_resolution > 0.0) {
            return Err(OperationError::Validation(
                "Target resolution must be positive".to_string(),
            ));
        }

        let scale_x = source.transform.pixel_width() / target_resolution;
        let scale_y = source.transform.pixel_height() / target_resolution;
        let width = (f64::from(source.width) * scale_x) as u64;
        let height = (f64::from(source.height) * scale_y) as u64;

        if width == 0 || height == 0 {
            return Err(OperationError::Validation(format!(
                "Target resolution {target_resolution} collapses the {}x{} raster to an empty grid",
                source.width, source.height
            )));
        }

        let transform = source.transform.scaled(
            f64::from(source.width) / width as f64,
            f64::from(source.height) / height as f64,
        );

        Ok(Self { scale_x, scale_y, width, height, transform })
    }
}

/// True when `target` is within 1% of `current`.
pub fn within_tolerance(current: f64, target: f64) -> bool {
    (current - target).abs() < current * RESOLUTION_TOLERANCE
}

/// `0.5` becomes `0_50`.
pub fn resolution_fragment(resolution: f64) -> String {
    format!("{resolution:.2}").replace('.', "_")
}

pub struct ResampleHandler {
    collab: Collaborators,
}

impl ResampleHandler {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    pub async fn resample(
        &self,
        params: &ResampleParams,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        let c = &self.collab;
        info!(job_id = %ctx.job_id(), raster = %params.raster_path, target_resolution = params.target_resolution, "Starting resample operation");

        if !(params.target_resolution.is_finite() && params.target_resolution > 0.0) {
            return Err(OperationError::Validation(
                "Target resolution must be positive".to_string(),
            ));
        }
        c.require_exists(&params.raster_path, "Raster").await?;
        let raster = c.raster(&params.raster_path).await?;
        ctx.progress(milestone::VALIDATED, "Validating input parameters...").await?;

        let current = raster.resolution();
        info!(job_id = %ctx.job_id(), current_resolution = current, target_resolution = params.target_resolution, "Resolution check");
        if within_tolerance(current, params.target_resolution) {
            warn!(job_id = %ctx.job_id(), "Raster resolution is already close to target resolution");
            return Ok(OperationOutcome::unchanged(
                &params.raster_path,
                "Raster is already at the target resolution",
            ));
        }

        let grid = ResampleGrid::compute(&raster, params.target_resolution)?;
        let (width, height) = match (u32::try_from(grid.width), u32::try_from(grid.height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(OperationError::Validation(format!(
                    "Resampled grid {}x{} is too large",
                    grid.width, grid.height
                )))
            }
        };

        let output_path = c.resolve_output(
            &params.raster_path,
            &format!(
                "resampled_{}_{}",
                resolution_fragment(params.target_resolution),
                params.resampling_method
            ),
            params.output_name.as_deref(),
        );

        ctx.progress(milestone::COMPUTING, "Resampling raster...").await?;
        let request = ResampleRequest {
            raster_path: params.raster_path.clone(),
            output_path,
            width,
            height,
            transform: grid.transform,
            method: params.resampling_method,
        };
        let result_path = ctx.guard(async { Ok(c.geo.resample(&request).await?) }).await?;

        ctx.progress(milestone::FINALIZING, "Finalizing...").await?;
        c.confirm_written(&result_path, "Resampled").await?;

        info!(job_id = %ctx.job_id(), output = %result_path, width, height, "Resampling completed");
        Ok(OperationOutcome::created(
            result_path,
            "Resampling completed successfully",
        ))
    }
}

#[async_trait]
impl OperationHandler for ResampleHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Resample
    }

    fn validate(&self, descriptor: &OperationDescriptor) -> Result<(), OperationError> {
        match descriptor {
            OperationDescriptor::Resample(p) if p.target_resolution > 0.0 => Ok(()),
            OperationDescriptor::Resample(_) => Err(OperationError::Validation(
                "Target resolution must be positive".to_string(),
            )),
            other => Err(mismatched(OperationKind::Resample, other)),
        }
    }

    async fn run(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        match descriptor {
            OperationDescriptor::Resample(params) => self.resample(params, ctx).await,
            other => Err(mismatched(OperationKind::Resample, other)),
        }
    }
}
