#![recursion_limit = "256"]

pub mod export;
pub mod factory;
pub mod segmenter;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

use std::path::PathBuf;

pub use export::{gen_test_output, save_inference_samples, segment_file, segment_frame};
pub use factory::{InferenceThresholds, SegmentationFactory};
pub use segmenter::{classify_pixels, BackgroundSegmenter, BurnSegmenter};

pub type InferenceResult<T> = Result<T, InferenceError>;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Dataset(#[from] road_dataset::RoadDatasetError),
    #[error(transparent)]
    Frame(#[from] vision_core::interfaces::FrameError),
    #[error(transparent)]
    Overlay(#[from] vision_core::overlay::OverlaySizeMismatch),
    #[error(transparent)]
    Model(#[from] models::ModelError),
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub mod prelude {
    pub use crate::export::{gen_test_output, save_inference_samples, segment_file, segment_frame};
    pub use crate::factory::{InferenceThresholds, SegmentationFactory};
    pub use crate::segmenter::{BackgroundSegmenter, BurnSegmenter};
    pub use crate::{InferenceBackend, InferenceError, InferenceResult};
}
