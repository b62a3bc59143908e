//! Burn models for road segmentation.
//!
//! - `VggBackbone`: VGG16 encoder with the fully-connected layers recast as
//!   convolutions, exposing the `layer3_out`/`layer4_out`/`layer7_out` taps.
//! - `FcnDecoder`: 1x1 conv plus three transposed convolutions with skip
//!   connections back onto the encoder taps.
//! - `Fcn8`: backbone + decoder, producing per-pixel class logits.
//! - `checkpoint`: saving/loading a trained `Fcn8` with the config that built it.
//!
//! These are pure Burn modules; training and inference live in their own crates.

pub mod checkpoint;
pub mod fcn;
pub mod vgg;

pub use checkpoint::{
    checkpoint_exists, load_checkpoint, save_checkpoint, CheckpointMeta, CHECKPOINT_CONFIG_FILE,
    CHECKPOINT_MODEL_FILE,
};
pub use fcn::{Fcn8, Fcn8Config, FcnDecoder, FcnDecoderConfig};
pub use vgg::{
    load_vgg, DenseWeights, TorchvisionVgg, TorchvisionVggRecord, VggBackbone, VggConfig,
    VggLayers, VggTaps, VggTensor, VggWeightsFormat, IMAGE_INPUT, KEEP_PROB, LAYER3_OUT,
    LAYER4_OUT, LAYER7_OUT, VGG_TAG,
};

use std::path::PathBuf;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("wrong path to {tag}: {path} is not a directory")]
    WrongPath { tag: &'static str, path: PathBuf },
    #[error("no weights file in {dir}; expected one of {expected}")]
    MissingWeights { dir: PathBuf, expected: String },
    #[error("failed to load weights from {path}: {msg}")]
    Record { path: PathBuf, msg: String },
    #[error("failed to save weights to {path}: {msg}")]
    Save { path: PathBuf, msg: String },
    #[error("tensor {name}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("unknown tensor name {0:?}")]
    UnknownTensor(String),
    #[error("{0} is not a feature map")]
    NotAFeatureMap(&'static str),
    #[error("invalid model config: {0}")]
    Config(String),
}

pub mod prelude {
    pub use super::{
        load_checkpoint, load_vgg, save_checkpoint, CheckpointMeta, Fcn8, Fcn8Config, FcnDecoder, FcnDecoderConfig, ModelError, ModelResult,
        VggBackbone, VggConfig, VggTaps,
    };
}
