use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use data_contracts::{ClassPalette, ImageShape};
use image::imageops::FilterType;
use image::RgbImage;
use models::{CheckpointMeta, Fcn8};
use vision_core::interfaces::{Frame, SegmentationResult, Segmenter};

/// Turn class probabilities `[C, pixels]` (class-major) into one class per pixel.
///
/// With two classes a pixel takes the non-background class when its
/// probability exceeds `threshold`; otherwise the most likely class wins.
pub fn classify_pixels(
    probs: &[f32],
    num_classes: usize,
    pixels: usize,
    threshold: f32,
    background_index: usize,
) -> Vec<u8> {
    if num_classes == 2 {
        let foreground = 1 - background_index.min(1);
        let scores = &probs[foreground * pixels..(foreground + 1) * pixels];
        return scores
            .iter()
            .map(|&p| {
                if p > threshold {
                    foreground as u8
                } else {
                    background_index as u8
                }
            })
            .collect();
    }
    (0..pixels)
        .map(|p| {
            (0..num_classes)
                .max_by(|&a, &b| probs[a * pixels + p].total_cmp(&probs[b * pixels + p]))
                .unwrap_or(background_index) as u8
        })
        .collect()
}

/// Labels every pixel as background; stands in when no checkpoint is available.
#[derive(Debug, Clone)]
pub struct BackgroundSegmenter {
    num_classes: usize,
    background_index: usize,
}

impl BackgroundSegmenter {
    pub fn new(palette: &ClassPalette) -> Self {
        Self {
            num_classes: palette.num_classes(),
            background_index: palette.background_index,
        }
    }
}

impl Segmenter for BackgroundSegmenter {
    fn segment(&mut self, frame: &Frame) -> SegmentationResult {
        let (w, h) = frame.size;
        SegmentationResult::from_class_map(
            frame.id,
            w,
            h,
            vec![self.background_index as u8; w as usize * h as usize],
            self.num_classes,
        )
    }
}

pub struct BurnSegmenter<B: Backend> {
    model: Fcn8<B>,
    meta: CheckpointMeta,
    threshold: f32,
    device: B::Device,
}

impl<B: Backend> BurnSegmenter<B> {
    pub fn new(model: Fcn8<B>, meta: CheckpointMeta, threshold: f32, device: B::Device) -> Self {
        Self {
            model,
            meta,
            threshold,
            device,
        }
    }

    pub fn image_shape(&self) -> ImageShape {
        self.meta.image_shape
    }

    pub fn palette(&self) -> &ClassPalette {
        &self.meta.palette
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Softmax scores `[C, H*W]` for `image` resized to the model shape.
    pub fn probabilities(&self, image: &RgbImage) -> Option<Vec<f32>> {
        let shape = self.meta.image_shape;
        let (w, h) = shape.wh_u32();
        let resized;
        let image = if image.dimensions() == (w, h) {
            image
        } else {
            resized = image::imageops::resize(image, w, h, FilterType::Triangle);
            &resized
        };
        let sample = match road_dataset::build_sample(image, None, &self.meta.palette, 0) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("cannot prepare image for segmentation: {e}");
                return None;
            }
        };
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(sample.image_chw, [1, 3, shape.height, shape.width]),
            &self.device,
        );
        let probs = softmax(self.model.forward(input), 1);
        match probs.into_data().convert::<f32>().to_vec::<f32>() {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("cannot read segmentation output: {e:?}");
                None
            }
        }
    }

    pub fn segment_rgb(&self, frame_id: u64, image: &RgbImage) -> SegmentationResult {
        let shape = self.meta.image_shape;
        let (w, h) = shape.wh_u32();
        let num_classes = self.meta.fcn.num_classes;
        let background = self.meta.palette.background_index;
        let class_map = match self.probabilities(image) {
            Some(probs) => {
                classify_pixels(&probs, num_classes, shape.pixels(), self.threshold, background)
            }
            None => vec![background as u8; shape.pixels()],
        };
        SegmentationResult::from_class_map(frame_id, w, h, class_map, num_classes)
    }
}

impl<B: Backend> Segmenter for BurnSegmenter<B> {
    fn segment(&mut self, frame: &Frame) -> SegmentationResult {
        match frame.to_rgba_image() {
            Ok(rgba) => {
                let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
                self.segment_rgb(frame.id, &rgb)
            }
            Err(e) => {
                log::warn!("frame {}: {e}; reporting background only", frame.id);
                let (w, h) = self.meta.image_shape.wh_u32();
                SegmentationResult::from_class_map(
                    frame.id,
                    w,
                    h,
                    vec![self.meta.palette.background_index as u8; self.meta.image_shape.pixels()],
                    self.meta.fcn.num_classes,
                )
            }
        }
    }

    fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }
}
