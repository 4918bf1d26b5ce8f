//! Side-effect-free previews of what an operation would do.
//!
//! Previews read metadata through the same collaborators as the handlers but
//! never create a job or write a file.

use strum::IntoEnumIterator;
use tracing::warn;

use crate::models::operation::{
    is_recognizable_crs, ClipParams, MosaicMethod, MosaicParams, ReprojectParams,
    ResampleParams, ResamplingMethod,
};
use crate::models::preview::{
    ClipPreview, MosaicPreview, ReprojectPreview, ResampleDirection, ResamplePreview,
};
use crate::models::raster::{Bounds, CompatibilityReport, RasterMetadata, VectorMetadata};
use crate::services::operations::{Collaborators, OperationError};

/// Inputs above this count get a batching recommendation.
const MOSAIC_BATCH_HINT: usize = 10;

#[derive(Clone)]
pub struct PreviewService {
    collab: Collaborators,
}

impl PreviewService {
    pub fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    pub async fn clip(&self, params: &ClipParams) -> Result<ClipPreview, OperationError> {
        let c = &self.collab;
        c.require_exists(&params.raster_path, "Raster").await?;
        c.require_exists(&params.vector_path, "Vector").await?;
        let raster = c.raster(&params.raster_path).await?;
        let vector = c.vector(&params.vector_path).await?;
        let crs_match = c.same_crs(&raster.crs, &vector.crs).await?;

        Ok(clip_summary(raster, vector, crs_match))
    }

    pub async fn reproject(
        &self,
        params: &ReprojectParams,
    ) -> Result<ReprojectPreview, OperationError> {
        let c = &self.collab;
        c.require_exists(&params.raster_path, "Raster").await?;
        let raster = c.raster(&params.raster_path).await?;

        let mut warnings = Vec::new();
        if !is_recognizable_crs(&params.target_crs) {
            warnings.push(format!("Invalid target CRS format: {}", params.target_crs));
        }
        let needs_reprojection = !c.same_crs(&raster.crs, &params.target_crs).await?;
        if !needs_reprojection {
            warnings.push("Raster is already in the target CRS".to_string());
        }

        Ok(ReprojectPreview {
            current_crs: raster.crs.clone(),
            target_crs: params.target_crs.clone(),
            raster_info: raster,
            needs_reprojection,
            warnings,
        })
    }

    pub async fn resample(
        &self,
        params: &ResampleParams,
    ) -> Result<ResamplePreview, OperationError> {
        let c = &self.collab;
        if !(params.target_resolution.is_finite() && params.target_resolution > 0.0) {
            return Err(OperationError::Validation(
                "Target resolution must be positive".to_string(),
            ));
        }
        c.require_exists(&params.raster_path, "Raster").await?;
        let raster = c.raster(&params.raster_path).await?;

        Ok(resample_summary(raster, params.target_resolution))
    }

    pub async fn mosaic(&self, params: &MosaicParams) -> Result<MosaicPreview, OperationError> {
        let c = &self.collab;
        let mut valid_files = Vec::new();
        let mut missing_files = Vec::new();
        for path in &params.raster_paths {
            if c.storage.exists(path).await? {
                valid_files.push(path.clone());
            } else {
                missing_files.push(path.clone());
            }
        }
        if valid_files.is_empty() {
            return Err(OperationError::Validation(
                "No existing raster files found".to_string(),
            ));
        }

        let mut metadata = Vec::with_capacity(valid_files.len());
        for path in &valid_files {
            match c.raster(path).await {
                Ok(meta) => metadata.push(meta),
                Err(e) => warn!(path = %path, error = %e, "Skipping raster in mosaic preview"),
            }
        }

        Ok(mosaic_summary(
            params.raster_paths.len(),
            valid_files,
            missing_files,
            &metadata,
        ))
    }
}

pub fn clip_summary(raster: RasterMetadata, vector: VectorMetadata, crs_match: bool) -> ClipPreview {
    let intersects = vector.bounds.intersects(&raster.bounds);

    let mut warnings = Vec::new();
    if !crs_match {
        warnings.push("CRS mismatch - vector will be reprojected".to_string());
    }
    if !intersects {
        warnings.push("Geometries don't appear to intersect".to_string());
    }

    ClipPreview {
        estimated_output_bounds: intersects.then_some(vector.bounds),
        raster_info: raster,
        vector_info: vector,
        crs_match,
        geometries_intersect: intersects,
        warnings,
    }
}

pub fn resample_summary(raster: RasterMetadata, target_resolution: f64) -> ResamplePreview {
    let current_x = raster.transform.pixel_width();
    let current_y = raster.transform.pixel_height();
    let current = current_x.min(current_y);

    let scale_x = current_x / target_resolution;
    let scale_y = current_y / target_resolution;
    let new_width = (f64::from(raster.width) * scale_x) as u64;
    let new_height = (f64::from(raster.height) * scale_y) as u64;

    let current_pixels = raster.pixel_count();
    let ratio = if current_pixels > 0 {
        (new_width as f64 * new_height as f64) / current_pixels as f64
    } else {
        1.0
    };

    let direction = if target_resolution < current {
        ResampleDirection::Upsampling
    } else if target_resolution > current {
        ResampleDirection::Downsampling
    } else {
        ResampleDirection::NoChange
    };

    let mut warnings = Vec::new();
    if ratio > 10.0 {
        warnings.push("Output file will be significantly larger (>10x)".to_string());
    } else if ratio > 4.0 {
        warnings.push("Output file will be much larger (>4x)".to_string());
    }
    if direction == ResampleDirection::Upsampling && scale_x > 5.0 {
        warnings.push("High upsampling ratio may result in pixelated output".to_string());
    }

    ResamplePreview {
        raster_info: raster,
        current_resolution_x: current_x,
        current_resolution_y: current_y,
        current_resolution: current,
        target_resolution,
        scale_factor_x: scale_x,
        scale_factor_y: scale_y,
        operation_type: direction,
        new_width,
        new_height,
        pixel_count_ratio: ratio,
        warnings,
        supported_methods: ResamplingMethod::iter().collect(),
    }
}

pub fn mosaic_summary(
    total_files: usize,
    valid_files: Vec<String>,
    missing_files: Vec<String>,
    metadata: &[RasterMetadata],
) -> MosaicPreview {
    let compatibility = CompatibilityReport::from_metadata(metadata);
    let combined_bounds = Bounds::union_all(metadata.iter().map(|m| &m.bounds));
    let total_area = metadata.iter().map(|m| m.bounds.area()).sum();

    // The output grid follows the first raster's pixel size.
    let (estimated_width, estimated_height) = match (combined_bounds, metadata.first()) {
        (Some(bounds), Some(first))
            if first.transform.pixel_width() > 0.0 && first.transform.pixel_height() > 0.0 =>
        {
            (
                Some((bounds.width() / first.transform.pixel_width()) as u64),
                Some((bounds.height() / first.transform.pixel_height()) as u64),
            )
        }
        _ => (None, None),
    };

    MosaicPreview {
        recommendations: mosaic_recommendations(&compatibility),
        total_files,
        valid_files,
        missing_files,
        compatibility,
        combined_bounds,
        total_area,
        estimated_width,
        estimated_height,
        supported_methods: MosaicMethod::iter().collect(),
    }
}

pub fn mosaic_recommendations(report: &CompatibilityReport) -> Vec<String> {
    let mut out = Vec::new();

    if !report.compatible {
        out.push("Consider preprocessing files to ensure compatibility".to_string());
        for warning in &report.warnings {
            let hint = if warning.contains("CRS") {
                "Reproject all rasters to the same CRS before mosaicking"
            } else if warning.contains("resolution") {
                "Resample all rasters to the same resolution"
            } else if warning.contains("band") {
                "Ensure all rasters have the same number of bands"
            } else if warning.contains("data type") {
                "Convert all rasters to the same data type"
            } else {
                continue;
            };
            out.push(hint.to_string());
        }
    }

    if report.raster_count > MOSAIC_BATCH_HINT {
        out.push("Large number of files - consider processing in batches".to_string());
    }
    out
}
