//! Raster and vector fixtures shared by the integration tests

use raster_orchestrator::models::raster::{Bounds, GeoTransform, RasterMetadata, VectorMetadata};

/// A raster the fake backend reports metadata for.
#[derive(Debug, Clone)]
pub struct RasterFixture {
    pub path: &'static str,
    pub crs: &'static str,
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f64; 4],
    pub pixel_size: f64,
    pub band_count: u32,
    pub dtype: &'static str,
    pub nodata: Option<f64>,
    pub description: &'static str,
}

impl RasterFixture {
    pub fn metadata(&self) -> RasterMetadata {
        let bounds = Bounds::from(self.bounds);
        RasterMetadata {
            crs: self.crs.to_string(),
            width: (bounds.width() / self.pixel_size).round() as u32,
            height: (bounds.height() / self.pixel_size).round() as u32,
            transform: GeoTransform::north_up(bounds.min_x, bounds.max_y, self.pixel_size),
            bounds,
            band_count: self.band_count,
            dtype: self.dtype.to_string(),
            nodata: self.nodata,
        }
    }
}

pub const ORTHO: RasterFixture = RasterFixture {
    path: "ortho.tif",
    crs: "EPSG:31983",
    bounds: [0.0, 0.0, 1000.0, 800.0],
    pixel_size: 1.0,
    band_count: 3,
    dtype: "uint8",
    nodata: None,
    description: "1 m RGB orthophoto, 1000x800",
};

pub const TILE_A: RasterFixture = RasterFixture {
    path: "tiles/a.tif",
    crs: "EPSG:31983",
    bounds: [0.0, 0.0, 100.0, 100.0],
    pixel_size: 0.5,
    band_count: 3,
    dtype: "uint8",
    nodata: Some(0.0),
    description: "West tile, RGB",
};

pub const TILE_B: RasterFixture = RasterFixture {
    path: "tiles/b.tif",
    crs: "EPSG:31983",
    bounds: [100.0, 0.0, 200.0, 100.0],
    pixel_size: 0.5,
    band_count: 3,
    dtype: "uint8",
    nodata: Some(0.0),
    description: "East tile, RGB, same grid as west",
};

pub const TILE_B_RGBA: RasterFixture = RasterFixture {
    path: "tiles/b_rgba.tif",
    crs: "EPSG:31983",
    bounds: [100.0, 0.0, 200.0, 100.0],
    pixel_size: 0.5,
    band_count: 4,
    dtype: "uint8",
    nodata: Some(0.0),
    description: "East tile with an alpha band",
};

pub const TILE_WGS84: RasterFixture = RasterFixture {
    path: "tiles/c_wgs84.tif",
    crs: "EPSG:4326",
    bounds: [-46.7, -23.6, -46.6, -23.5],
    pixel_size: 0.0001,
    band_count: 3,
    dtype: "uint8",
    nodata: Some(0.0),
    description: "Geographic tile, different CRS",
};

pub const SMALL: RasterFixture = RasterFixture {
    path: "small.tif",
    crs: "EPSG:31983",
    bounds: [0.0, 0.0, 5.0, 5.0],
    pixel_size: 1.0,
    band_count: 1,
    dtype: "float32",
    nodata: None,
    description: "5x5 single band raster",
};

pub fn vector(crs: &str, bounds: [f64; 4]) -> VectorMetadata {
    VectorMetadata {
        crs: crs.to_string(),
        bounds: Bounds::from(bounds),
        feature_count: 1,
        geometry_type: Some("Polygon".to_string()),
    }
}
