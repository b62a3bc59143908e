//! Core types, error definitions, and data structures for road_dataset.

use data_contracts::ValidationError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, RoadDatasetError>;

#[derive(Debug, Error)]
pub enum RoadDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no ground-truth label for image {image}")]
    MissingLabel { image: PathBuf },
    #[error("label {label} is {label_w}x{label_h} but image {image} is {image_w}x{image_h}")]
    SizeMismatch {
        image: PathBuf,
        label: PathBuf,
        image_w: u32,
        image_h: u32,
        label_w: u32,
        label_h: u32,
    },
    #[error("invalid contract: {0}")]
    Contract(#[from] ValidationError),
    #[error("dataset layout check failed: {0}")]
    Layout(String),
    #[error("{0}")]
    Other(String),
}

/// One camera image and, for training splits, its ground-truth mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndex {
    /// Position in the sorted index; mixed into per-sample augmentation seeds.
    pub id: u64,
    pub image_path: PathBuf,
    pub label_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SegmentationSample {
    pub id: u64,
    /// Image in CHW layout, normalized to [0, 1].
    pub image_chw: Vec<f32>,
    /// Class index per pixel, row-major HW.
    pub class_map: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

/// File count for one directory of the dataset layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirCount {
    pub dir: PathBuf,
    pub expected: usize,
    pub found: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub counts: Vec<DirCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub images: usize,
    pub paired: usize,
    pub unpaired: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_unpaired: Option<usize>,
    pub max_unpaired_ratio: Option<f32>,
    pub min_images: Option<usize>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_unpaired: parse("ROADSEG_DATASET_MAX_UNPAIRED"),
            max_unpaired_ratio: parse("ROADSEG_DATASET_MAX_UNPAIRED_RATIO"),
            min_images: parse("ROADSEG_DATASET_MIN_IMAGES"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: TrainingSummary,
}
