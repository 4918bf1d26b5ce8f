use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Strict overlap test; boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Union of every box in `bounds`, or `None` when empty.
    pub fn union_all<'a>(bounds: impl IntoIterator<Item = &'a Bounds>) -> Option<Bounds> {
        bounds.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(u) => Some(u.union(b)),
        })
    }
}

impl From<[f64; 4]> for Bounds {
    fn from(v: [f64; 4]) -> Self {
        Bounds::new(v[0], v[1], v[2], v[3])
    }
}

impl From<Bounds> for [f64; 4] {
    fn from(b: Bounds) -> Self {
        [b.min_x, b.min_y, b.max_x, b.max_y]
    }
}

/// Affine pixel-to-world transform in `(a, b, c, d, e, f)` order:
/// `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with square pixels anchored at `(origin_x, origin_y)`.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        Self::new(pixel_size, 0.0, origin_x, 0.0, -pixel_size, origin_y)
    }

    pub fn pixel_width(&self) -> f64 {
        self.a.abs()
    }

    pub fn pixel_height(&self) -> f64 {
        self.e.abs()
    }

    /// Finest of the two axis resolutions.
    pub fn resolution(&self) -> f64 {
        self.pixel_width().min(self.pixel_height())
    }

    /// Compose with a pure scale, keeping the origin fixed.
    pub fn scaled(&self, sx: f64, sy: f64) -> GeoTransform {
        GeoTransform {
            a: self.a * sx,
            b: self.b * sy,
            c: self.c,
            d: self.d * sx,
            e: self.e * sy,
            f: self.f,
        }
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(v: [f64; 6]) -> Self {
        GeoTransform::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(t: GeoTransform) -> Self {
        [t.a, t.b, t.c, t.d, t.e, t.f]
    }
}

/// Metadata reported by the geospatial backend for a raster dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub crs: String,
    pub bounds: Bounds,
    pub width: u32,
    pub height: u32,
    pub band_count: u32,
    pub dtype: String,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    pub fn resolution(&self) -> f64 {
        self.transform.resolution()
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Metadata reported by the geospatial backend for a vector dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub crs: String,
    pub bounds: Bounds,
    pub feature_count: u64,
    pub geometry_type: Option<String>,
}

/// Cross-input summary used to warn about mosaic inputs that disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub raster_count: usize,
    pub crs: Vec<String>,
    pub band_counts: Vec<u32>,
    pub dtypes: Vec<String>,
    pub resolutions: Vec<f64>,
    pub nodata_values: Vec<Option<f64>>,
    pub warnings: Vec<String>,
}

impl CompatibilityReport {
    pub fn from_metadata(rasters: &[RasterMetadata]) -> Self {
        let crs = distinct(rasters.iter().map(|r| r.crs.clone()));
        let band_counts = distinct(rasters.iter().map(|r| r.band_count));
        let dtypes = distinct(rasters.iter().map(|r| r.dtype.clone()));
        let resolutions = distinct(rasters.iter().map(|r| round6(r.resolution())));
        let nodata_values = distinct(rasters.iter().map(|r| r.nodata));

        let mut warnings = Vec::new();
        if crs.len() > 1 {
            warnings.push(format!("Different CRS found: {}", SetDisplay(&crs)));
        }
        if band_counts.len() > 1 {
            warnings.push(format!("Different band counts: {}", SetDisplay(&band_counts)));
        }
        if dtypes.len() > 1 {
            warnings.push(format!("Different data types: {}", SetDisplay(&dtypes)));
        }
        if resolutions.len() > 1 {
            warnings.push(format!("Different resolutions: {}", SetDisplay(&resolutions)));
        }
        if nodata_values.len() > 1 {
            let shown: Vec<String> = nodata_values
                .iter()
                .map(|v| v.map_or_else(|| "None".to_string(), |v| v.to_string()))
                .collect();
            warnings.push(format!("Different nodata values: {}", SetDisplay(&shown)));
        }

        let compatible = !rasters.is_empty()
            && crs.len() == 1
            && band_counts.len() == 1
            && dtypes.len() == 1
            && resolutions.len() == 1
            && nodata_values.len() == 1;

        if rasters.is_empty() {
            warnings.push("No rasters provided".to_string());
        }

        Self {
            compatible,
            raster_count: rasters.len(),
            crs,
            band_counts,
            dtypes,
            resolutions,
            nodata_values,
            warnings,
        }
    }
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Distinct values in first-seen order.
fn distinct<T: PartialEq>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

struct SetDisplay<'a, T>(&'a [T]);

impl<T: fmt::Display> fmt::Display for SetDisplay<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(crs: &str, bands: u32, pixel: f64) -> RasterMetadata {
        RasterMetadata {
            crs: crs.to_string(),
            bounds: Bounds::new(0.0, 0.0, 100.0, 100.0),
            width: 100,
            height: 100,
            band_count: bands,
            dtype: "uint8".to_string(),
            transform: GeoTransform::north_up(0.0, 100.0, pixel),
            nodata: None,
        }
    }

    #[test]
    fn test_touching_bounds_do_not_intersect() {
        let a = Bounds::new(0.0, 0.0, 5.0, 5.0);
        assert!(!a.intersects(&Bounds::new(5.0, 0.0, 10.0, 5.0)));
        assert!(!a.intersects(&Bounds::new(10.0, 10.0, 20.0, 20.0)));
        assert!(a.intersects(&Bounds::new(4.0, 4.0, 6.0, 6.0)));
    }

    #[test]
    fn test_union_all() {
        let boxes = [
            Bounds::new(0.0, 0.0, 5.0, 5.0),
            Bounds::new(3.0, -2.0, 8.0, 4.0),
        ];
        assert_eq!(Bounds::union_all(&boxes), Some(Bounds::new(0.0, -2.0, 8.0, 5.0)));
        assert_eq!(Bounds::union_all(std::iter::empty()), None);
    }

    #[test]
    fn test_bounds_serialize_as_array() {
        let json = serde_json::to_value(Bounds::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(json, serde_json::json!([1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_identical_inputs_are_compatible() {
        let report = CompatibilityReport::from_metadata(&[
            raster("EPSG:4326", 3, 1.0),
            raster("EPSG:4326", 3, 1.0),
        ]);
        assert!(report.compatible);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_crs_mismatch_listed() {
        let report = CompatibilityReport::from_metadata(&[
            raster("EPSG:4326", 3, 1.0),
            raster("EPSG:3857", 3, 1.0),
        ]);
        assert!(!report.compatible);
        assert_eq!(report.crs, vec!["EPSG:4326", "EPSG:3857"]);
        assert!(report.warnings[0].starts_with("Different CRS found"));
    }

    #[test]
    fn test_resolution_rounded_to_six_decimals() {
        let report = CompatibilityReport::from_metadata(&[
            raster("EPSG:4326", 1, 0.1000001),
            raster("EPSG:4326", 1, 0.1000002),
        ]);
        assert!(report.compatible, "{:?}", report.warnings);
    }

    #[test]
    fn test_band_count_warning() {
        let report = CompatibilityReport::from_metadata(&[
            raster("EPSG:4326", 3, 1.0),
            raster("EPSG:4326", 4, 1.0),
        ]);
        assert!(!report.compatible);
        assert_eq!(report.warnings, vec!["Different band counts: {3, 4}".to_string()]);
    }

    #[test]
    fn test_scaled_transform_keeps_origin() {
        let t = GeoTransform::north_up(500.0, 900.0, 2.0).scaled(0.25, 0.25);
        assert_eq!(t, GeoTransform::new(0.5, 0.0, 500.0, 0.0, -0.5, 900.0));
        assert_eq!(t.resolution(), 0.5);
    }
}
