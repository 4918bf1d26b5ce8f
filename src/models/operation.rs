use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// The raster transformations the orchestrator knows how to run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OperationKind {
    Clip,
    Reproject,
    Resample,
    Mosaic,
}

/// Interpolation kernel used when changing the pixel grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResamplingMethod {
    Nearest,
    #[default]
    Bilinear,
    Cubic,
    Average,
}

/// Per-pixel combination rule where mosaic inputs overlap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MosaicMethod {
    #[default]
    First,
    Last,
    Min,
    Max,
    Mean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ClipParams {
    #[garde(length(min = 1))]
    pub raster_path: String,

    #[garde(length(min = 1))]
    pub vector_path: String,

    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReprojectParams {
    #[garde(length(min = 1))]
    pub raster_path: String,

    #[garde(custom(recognizable_crs))]
    pub target_crs: String,

    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResampleParams {
    #[garde(length(min = 1))]
    pub raster_path: String,

    #[garde(custom(strictly_positive))]
    pub target_resolution: f64,

    #[serde(default)]
    #[garde(skip)]
    pub resampling_method: ResamplingMethod,

    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MosaicParams {
    #[garde(length(min = 2), inner(length(min = 1)))]
    pub raster_paths: Vec<String>,

    #[serde(default)]
    #[garde(skip)]
    pub method: MosaicMethod,

    #[serde(default)]
    #[garde(length(min = 1, max = 255))]
    pub output_name: Option<String>,
}

/// An operation plus its typed parameter bag, as carried on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "parameters", rename_all = "snake_case")]
pub enum OperationDescriptor {
    Clip(ClipParams),
    Reproject(ReprojectParams),
    Resample(ResampleParams),
    Mosaic(MosaicParams),
}

impl OperationDescriptor {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Clip(_) => OperationKind::Clip,
            Self::Reproject(_) => OperationKind::Reproject,
            Self::Resample(_) => OperationKind::Resample,
            Self::Mosaic(_) => OperationKind::Mosaic,
        }
    }

    /// Run the field-level checks for whichever parameter bag this carries.
    pub fn validate_params(&self) -> Result<(), garde::Report> {
        match self {
            Self::Clip(p) => p.validate(),
            Self::Reproject(p) => p.validate(),
            Self::Resample(p) => p.validate(),
            Self::Mosaic(p) => p.validate(),
        }
    }

    /// Input paths referenced by the descriptor, in submission order.
    pub fn input_paths(&self) -> Vec<&str> {
        match self {
            Self::Clip(p) => vec![p.raster_path.as_str(), p.vector_path.as_str()],
            Self::Reproject(p) => vec![p.raster_path.as_str()],
            Self::Resample(p) => vec![p.raster_path.as_str()],
            Self::Mosaic(p) => p.raster_paths.iter().map(String::as_str).collect(),
        }
    }
}

fn strictly_positive(value: &f64, _ctx: &()) -> garde::Result {
    if value.is_finite() && *value > 0.0 {
        Ok(())
    } else {
        Err(garde::Error::new("target resolution must be strictly positive"))
    }
}

fn recognizable_crs(value: &str, _ctx: &()) -> garde::Result {
    if is_recognizable_crs(value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!("invalid CRS format: {value}")))
    }
}

/// Accepts `EPSG:<code>` (up to six digits), PROJ strings and WKT definitions.
pub fn is_recognizable_crs(crs: &str) -> bool {
    let crs = crs.trim().to_uppercase();

    if let Some(code) = crs.strip_prefix("EPSG:") {
        let code = code.trim();
        return !code.is_empty() && code.len() <= 6 && code.chars().all(|c| c.is_ascii_digit());
    }

    if crs.starts_with("+PROJ=") {
        return true;
    }

    ["GEOGCS", "PROJCS", "GEOGCRS", "PROJCRS"]
        .iter()
        .any(|keyword| crs.contains(keyword))
}
