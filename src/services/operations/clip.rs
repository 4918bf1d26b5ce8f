use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::operation::{ClipParams, OperationDescriptor, OperationKind};
use crate::services::geo::{MaskRequest, VectorReprojectRequest};
use crate::services::operations::{
    milestone, mismatched, Collaborators, OperationContext, OperationError, OperationHandler,
    OperationOutcome,
};

/// Clips a raster by vector geometries, cropping to their envelope.
pub struct ClipHandler {
    collab: Collaborators,
}

impl ClipHandler {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    pub async fn clip(
        &self,
        params: &ClipParams,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        let c = &self.collab;
        info!(job_id = %ctx.job_id(), raster = %params.raster_path, vector = %params.vector_path, "Starting clip operation");

        c.require_exists(&params.raster_path, "Raster").await?;
        c.require_exists(&params.vector_path, "Vector").await?;
        let raster = c.raster(&params.raster_path).await?;
        let vector = c.vector(&params.vector_path).await?;
        ctx.progress(milestone::VALIDATED, "Validating input files...").await?;

        let output_path =
            c.resolve_output(&params.raster_path, "clipped", params.output_name.as_deref());

        let mut warnings = Vec::new();
        if !raster.bounds.intersects(&vector.bounds) {
            warn!(job_id = %ctx.job_id(), "Clip geometries do not intersect raster bounds");
            warnings.push("Geometries don't appear to intersect".to_string());
        }

        // The vector always follows the raster, never the other way round.
        let mut vector_path = params.vector_path.clone();
        if !c.same_crs(&raster.crs, &vector.crs).await? {
            info!(job_id = %ctx.job_id(), from = %vector.crs, to = %raster.crs, "Reprojecting clip vector");
            let request = VectorReprojectRequest {
                vector_path: params.vector_path.clone(),
                target_crs: raster.crs.clone(),
                output_path: reprojected_vector_path(&params.vector_path),
            };
            vector_path = ctx
                .guard(async { Ok(c.geo.reproject_vector(&request).await?) })
                .await?;
        }

        ctx.progress(milestone::COMPUTING, "Clipping raster...").await?;
        let request = MaskRequest {
            raster_path: params.raster_path.clone(),
            vector_path,
            output_path,
            crop: true,
        };
        let result_path = ctx.guard(async { Ok(c.geo.mask(&request).await?) }).await?;

        ctx.progress(milestone::FINALIZING, "Finalizing...").await?;
        c.confirm_written(&result_path, "Clipped").await?;

        info!(job_id = %ctx.job_id(), output = %result_path, "Clip operation completed");
        let mut outcome =
            OperationOutcome::created(result_path, "Clip operation completed successfully");
        outcome.warnings = warnings;
        Ok(outcome)
    }
}

/// Sibling path for a vector reprojected into the raster CRS.
fn reprojected_vector_path(vector_path: &str) -> String {
    match vector_path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains('/') => {
            format!("{stem}_reprojected.{ext}")
        }
        _ => format!("{vector_path}_reprojected"),
    }
}

#[async_trait]
impl OperationHandler for ClipHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Clip
    }

    async fn run(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        match descriptor {
            OperationDescriptor::Clip(params) => self.clip(params, ctx).await,
            other => Err(mismatched(OperationKind::Clip, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reprojected_vector_path() {
        assert_eq!(reprojected_vector_path("aoi.geojson"), "aoi_reprojected.geojson");
        assert_eq!(reprojected_vector_path("dir/aoi.shp"), "dir/aoi_reprojected.shp");
        assert_eq!(reprojected_vector_path("dir.v1/aoi"), "dir.v1/aoi_reprojected");
    }
}
