use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// Total downsampling factor of the VGG encoder (five 2x2 pools).
pub const ENCODER_STRIDE: usize = 32;

/// Spatial size images are resized to before entering the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub const KITTI: ImageShape = ImageShape {
        height: 160,
        width: 576,
    };

    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    pub fn is_divisible_by(&self, n: usize) -> bool {
        n > 0 && self.height % n == 0 && self.width % n == 0
    }

    /// The skip topology only lines up when every pooled map has integral size.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.height == 0 || self.width == 0 || !self.is_divisible_by(ENCODER_STRIDE) {
            return Err(ValidationError::InvalidShape {
                height: self.height,
                width: self.width,
                divisor: ENCODER_STRIDE,
            });
        }
        Ok(())
    }

    /// `(width, height)` in the order the `image` crate expects.
    pub fn wh_u32(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

impl Default for ImageShape {
    fn default() -> Self {
        Self::KITTI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kitti_shape_is_valid() {
        assert!(ImageShape::KITTI.validate().is_ok());
        assert_eq!(ImageShape::KITTI.pixels(), 160 * 576);
    }

    #[test]
    fn odd_shape_rejected() {
        let err = ImageShape::new(100, 576).validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidShape { divisor: 32, .. }));
        assert!(ImageShape::new(0, 0).validate().is_err());
    }
}
