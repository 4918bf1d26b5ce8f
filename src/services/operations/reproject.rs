use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::models::operation::{
    is_recognizable_crs, OperationDescriptor, OperationKind, ReprojectParams, ResamplingMethod,
};
use crate::services::geo::ReprojectRequest;
use crate::services::operations::{
    milestone, mismatched, Collaborators, OperationContext, OperationError, OperationHandler,
    OperationOutcome,
};

/// Per-band kernel used when warping. Kernel choice belongs to Resample.
pub const REPROJECT_KERNEL: ResamplingMethod = ResamplingMethod::Nearest;

pub struct ReprojectHandler {
    collab: Collaborators,
}

impl ReprojectHandler {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    pub async fn reproject(
        &self,
        params: &ReprojectParams,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        let c = &self.collab;
        info!(job_id = %ctx.job_id(), raster = %params.raster_path, target_crs = %params.target_crs, "Starting reproject operation");

        c.require_exists(&params.raster_path, "Raster").await?;
        let raster = c.raster(&params.raster_path).await?;
        if !is_recognizable_crs(&params.target_crs) {
            return Err(OperationError::Validation(format!(
                "Invalid CRS format: {}",
                params.target_crs
            )));
        }
        ctx.progress(milestone::VALIDATED, "Validating input file and CRS...").await?;

        if c.same_crs(&raster.crs, &params.target_crs).await? {
            warn!(job_id = %ctx.job_id(), crs = %params.target_crs, "Raster already in target CRS");
            return Ok(OperationOutcome::unchanged(
                &params.raster_path,
                "Raster is already in the target CRS",
            ));
        }

        let output_path = c.resolve_output(
            &params.raster_path,
            &format!("reprojected_{}", crs_suffix(&params.target_crs)),
            params.output_name.as_deref(),
        );

        ctx.progress(milestone::COMPUTING, "Reprojecting raster...").await?;
        info!(job_id = %ctx.job_id(), from = %raster.crs, to = %params.target_crs, "Reprojecting");
        let request = ReprojectRequest {
            raster_path: params.raster_path.clone(),
            target_crs: params.target_crs.clone(),
            output_path,
            resampling: REPROJECT_KERNEL,
        };
        let result_path = ctx
            .guard(async { Ok(c.geo.reproject_raster(&request).await?) })
            .await?;

        ctx.progress(milestone::FINALIZING, "Finalizing...").await?;
        c.confirm_written(&result_path, "Reprojected").await?;

        Ok(OperationOutcome::created(
            result_path,
            "Reprojection completed successfully",
        ))
    }
}

const MAX_CRS_FRAGMENT: usize = 40;
const CRS_FRAGMENT_PREFIX: usize = 24;

/// File-name fragment for a CRS: `EPSG:4326` becomes `EPSG_4326`.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`. Long definitions (WKT) keep a
/// short prefix plus a hash of the full string.
pub fn crs_suffix(crs: &str) -> String {
    let mut fragment = String::with_capacity(crs.len());
    for ch in crs.trim().chars().filter(|&c| c != '+') {
        let ch = if ch.is_ascii_alphanumeric() || ch == '-' { ch } else { '_' };
        if ch == '_' && (fragment.is_empty() || fragment.ends_with('_')) {
            continue;
        }
        fragment.push(ch);
    }
    while fragment.ends_with('_') {
        fragment.pop();
    }

    if fragment.is_empty() || fragment.len() > MAX_CRS_FRAGMENT {
        let digest = format!("{:x}", Sha256::digest(crs.as_bytes()));
        fragment.truncate(CRS_FRAGMENT_PREFIX);
        while fragment.ends_with('_') {
            fragment.pop();
        }
        if fragment.is_empty() {
            fragment.push_str("crs");
        }
        fragment.push('_');
        fragment.push_str(&digest[..8]);
    }
    fragment
}

#[async_trait]
impl OperationHandler for ReprojectHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Reproject
    }

    async fn run(
        &self,
        descriptor: &OperationDescriptor,
        ctx: &OperationContext,
    ) -> Result<OperationOutcome, OperationError> {
        match descriptor {
            OperationDescriptor::Reproject(params) => self.reproject(params, ctx).await,
            other => Err(mismatched(OperationKind::Reproject, other)),
        }
    }
}
