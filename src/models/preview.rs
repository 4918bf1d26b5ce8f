use serde::Serialize;

use crate::models::operation::{MosaicMethod, ResamplingMethod};
use crate::models::raster::{Bounds, CompatibilityReport, RasterMetadata, VectorMetadata};

#[derive(Debug, Clone, Serialize)]
pub struct ClipPreview {
    pub raster_info: RasterMetadata,
    pub vector_info: VectorMetadata,
    pub crs_match: bool,
    pub geometries_intersect: bool,
    pub estimated_output_bounds: Option<Bounds>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReprojectPreview {
    pub raster_info: RasterMetadata,
    pub current_crs: String,
    pub target_crs: String,
    pub needs_reprojection: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResampleDirection {
    Upsampling,
    Downsampling,
    NoChange,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResamplePreview {
    pub raster_info: RasterMetadata,
    pub current_resolution_x: f64,
    pub current_resolution_y: f64,
    pub current_resolution: f64,
    pub target_resolution: f64,
    pub scale_factor_x: f64,
    pub scale_factor_y: f64,
    pub operation_type: ResampleDirection,
    pub new_width: u64,
    pub new_height: u64,
    pub pixel_count_ratio: f64,
    pub warnings: Vec<String>,
    pub supported_methods: Vec<ResamplingMethod>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MosaicPreview {
    pub total_files: usize,
    pub valid_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub compatibility: CompatibilityReport,
    pub combined_bounds: Option<Bounds>,
    pub total_area: f64,
    pub estimated_width: Option<u64>,
    pub estimated_height: Option<u64>,
    pub supported_methods: Vec<MosaicMethod>,
    pub recommendations: Vec<String>,
}
