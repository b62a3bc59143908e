//! Dataset loading and Burn-compatible batching for road segmentation.
//!
//! This crate provides utilities for:
//! - Pairing camera images with their ground-truth road masks
//! - Decoding colour-coded masks into class maps
//! - Joint image/label augmentation
//! - Burn-compatible batch iteration with one-hot labels
//! - Checking that a dataset directory has the expected layout

pub mod aug;
pub mod batch;
pub mod index;
pub mod types;
pub mod validation;

pub use aug::{build_sample, DatasetConfig, TransformPipeline, TransformPipelineBuilder};
pub use batch::{BatchIter, SegmentationBatch};
pub use index::{
    gt_key, index_images, index_training, load_sample, load_sample_for_epoch, testing_dir,
    training_dir,
};
pub use types::*;
pub use validation::{
    check_layout, ensure_layout, summarize_training, validate_training_summary,
};
