//! Contract for the geospatial processing collaborator.
//!
//! The orchestrator never touches pixels. Everything numeric (masking,
//! warping, kernels, blending) happens behind [`GeoBackend`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::operation::{MosaicMethod, ResamplingMethod};
use crate::models::raster::{GeoTransform, RasterMetadata, VectorMetadata};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskRequest {
    pub raster_path: String,
    pub vector_path: String,
    pub output_path: String,
    /// Crop the output to the geometry envelope.
    pub crop: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprojectRequest {
    pub raster_path: String,
    pub target_crs: String,
    pub output_path: String,
    pub resampling: ResamplingMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorReprojectRequest {
    pub vector_path: String,
    pub target_crs: String,
    pub output_path: String,
}

/// A resample onto an explicit, already computed grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampleRequest {
    pub raster_path: String,
    pub output_path: String,
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub method: ResamplingMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub raster_paths: Vec<String>,
    pub output_path: String,
    pub method: MosaicMethod,
}

#[async_trait]
pub trait GeoBackend: Send + Sync {
    async fn raster_metadata(&self, path: &str) -> Result<RasterMetadata, GeoError>;

    async fn vector_metadata(&self, path: &str) -> Result<VectorMetadata, GeoError>;

    /// Clip a raster by the geometries of a vector in the same CRS.
    async fn mask(&self, request: &MaskRequest) -> Result<String, GeoError>;

    /// Warp a raster to `target_crs`, choosing the default output grid.
    async fn reproject_raster(&self, request: &ReprojectRequest) -> Result<String, GeoError>;

    async fn reproject_vector(&self, request: &VectorReprojectRequest)
        -> Result<String, GeoError>;

    async fn resample(&self, request: &ResampleRequest) -> Result<String, GeoError>;

    /// Merge rasters; CRS and metadata follow the first input.
    async fn merge(&self, request: &MergeRequest) -> Result<String, GeoError>;

    /// Whether two CRS definitions denote the same system.
    async fn crs_equivalent(&self, a: &str, b: &str) -> Result<bool, GeoError> {
        Ok(normalize_crs(a) == normalize_crs(b))
    }
}

/// Canonical spelling used for CRS comparison when the backend cannot do better:
/// case, surrounding and inner whitespace are ignored.
pub fn normalize_crs(crs: &str) -> String {
    crs.split_whitespace().collect::<String>().to_uppercase()
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeoError {
    /// The dataset exists but could not be opened as the expected kind.
    #[error("unreadable dataset {path}: {reason}")]
    InvalidFormat { path: String, reason: String },

    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Processing(String),

    #[error("geoprocessing backend unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_crs() {
        assert_eq!(normalize_crs(" epsg:4326 "), "EPSG:4326");
        assert_eq!(normalize_crs("EPSG: 4326"), normalize_crs("epsg:4326"));
        assert_ne!(normalize_crs("EPSG:4326"), normalize_crs("EPSG:3857"));
    }
}
