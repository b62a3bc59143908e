//! Shared data contracts for road segmentation: image shapes, class palettes,
//! and the expected on-disk dataset layout.

pub mod layout;
pub mod palette;
pub mod shape;

pub use layout::{DatasetLayout, SplitCounts};
pub use palette::{ClassEntry, ClassPalette};
pub use shape::ImageShape;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("palette needs at least two classes, got {0}")]
    TooFewClasses(usize),
    #[error("background index {index} out of range for {classes} classes")]
    BackgroundOutOfRange { index: usize, classes: usize },
    #[error("label colour {color:?} used by both {first} and {second}")]
    DuplicateLabelColor {
        color: [u8; 3],
        first: String,
        second: String,
    },
    #[error("image shape {height}x{width} must be non-zero and divisible by {divisor}")]
    InvalidShape {
        height: usize,
        width: usize,
        divisor: usize,
    },
}
