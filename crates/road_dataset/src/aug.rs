//! Resizing and joint image/label augmentation.

use crate::types::{DatasetResult, RoadDatasetError, SegmentationSample};
use data_contracts::{ClassPalette, ImageShape};
use image::imageops::FilterType;
use image::RgbImage;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Every image and label is resized to this shape.
    pub target_shape: ImageShape,
    /// Colour coding of the ground-truth masks.
    pub palette: ClassPalette,
    /// Probability of flipping image and label horizontally together.
    pub flip_horizontal_prob: f32,
    /// Probability of applying a light color jitter (brightness/contrast).
    pub color_jitter_prob: f32,
    /// Max jitter scale for brightness/contrast.
    pub color_jitter_strength: f32,
    /// Probability of adding uniform noise per channel.
    pub noise_prob: f32,
    /// Max absolute noise added (0-1 range).
    pub noise_strength: f32,
    /// Shuffle samples before each pass.
    pub shuffle: bool,
    /// Seed for reproducible shuffling and augmentation.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
    /// Optional transform pipeline override; if None, built from other fields.
    pub transform: Option<TransformPipeline>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            target_shape: ImageShape::KITTI,
            palette: ClassPalette::kitti_road(),
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            color_jitter_strength: 0.1,
            noise_prob: 0.0,
            noise_strength: 0.02,
            shuffle: true,
            seed: None,
            drop_last: false,
            transform: None,
        }
    }
}

impl DatasetConfig {
    /// Same shape and palette, deterministic order, no augmentation.
    pub fn for_eval(&self) -> Self {
        Self {
            flip_horizontal_prob: 0.0,
            color_jitter_prob: 0.0,
            noise_prob: 0.0,
            shuffle: false,
            drop_last: false,
            transform: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_shape: ImageShape,
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub noise_prob: f32,
    pub noise_strength: f32,
    pub seed: Option<u64>,
}

impl TransformPipeline {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            target_shape: cfg.target_shape,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            color_jitter_prob: cfg.color_jitter_prob,
            color_jitter_strength: cfg.color_jitter_strength,
            noise_prob: cfg.noise_prob,
            noise_strength: cfg.noise_strength,
            seed: cfg.seed,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "shape={}x{} flip_p={:.2} color_jitter_p={:.2} strength={:.2} noise_p={:.2} strength={:.3} seed={}",
            self.target_shape.height,
            self.target_shape.width,
            self.flip_horizontal_prob,
            self.color_jitter_prob,
            self.color_jitter_strength,
            self.noise_prob,
            self.noise_strength,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    /// Resize and augment an image and its optional label as one unit.
    pub fn apply(
        &self,
        img: RgbImage,
        label: Option<RgbImage>,
        sample_id: u64,
    ) -> (RgbImage, Option<RgbImage>) {
        self.apply_for_epoch(img, label, sample_id, 0)
    }

    /// Like [`apply`](Self::apply); a seeded pipeline draws a different
    /// augmentation for each `(sample_id, epoch)` pair.
    pub fn apply_for_epoch(
        &self,
        img: RgbImage,
        label: Option<RgbImage>,
        sample_id: u64,
        epoch: u64,
    ) -> (RgbImage, Option<RgbImage>) {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ sample_id ^ (epoch << 32));
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let (w, h) = self.target_shape.wh_u32();
        let mut img = resize_if_needed(img, w, h, FilterType::Triangle);
        // Nearest keeps label colours exact.
        let mut label = label.map(|l| resize_if_needed(l, w, h, FilterType::Nearest));

        maybe_hflip(&mut img, label.as_mut(), self.flip_horizontal_prob, rng);
        maybe_jitter(
            &mut img,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_noise(&mut img, self.noise_prob, self.noise_strength, rng);
        (img, label)
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::from_config(&DatasetConfig::default()),
        }
    }
    pub fn target_shape(mut self, shape: ImageShape) -> Self {
        self.inner.target_shape = shape;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn noise(mut self, prob: f32, strength: f32) -> Self {
        self.inner.noise_prob = prob;
        self.inner.noise_strength = strength;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

fn resize_if_needed(img: RgbImage, w: u32, h: u32, filter: FilterType) -> RgbImage {
    if img.dimensions() == (w, h) {
        img
    } else {
        image::imageops::resize(&img, w, h, filter)
    }
}

/// Normalize pixels to CHW [0,1] and decode the label colours into class ids.
pub fn build_sample(
    img: &RgbImage,
    label: Option<&RgbImage>,
    palette: &ClassPalette,
    id: u64,
) -> DatasetResult<SegmentationSample> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut image_chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        image_chw[base] = pixel[0] as f32 / 255.0;
        image_chw[plane + base] = pixel[1] as f32 / 255.0;
        image_chw[2 * plane + base] = pixel[2] as f32 / 255.0;
    }

    let class_map = match label {
        Some(label) => {
            if label.dimensions() != (width, height) {
                return Err(RoadDatasetError::Other(format!(
                    "label {}x{} does not match image {}x{} after resize",
                    label.width(),
                    label.height(),
                    width,
                    height
                )));
            }
            label
                .pixels()
                .map(|p| palette.class_for_color([p[0], p[1], p[2]]) as u8)
                .collect()
        }
        None => vec![palette.background_index as u8; plane],
    };

    Ok(SegmentationSample {
        id,
        image_chw,
        class_map,
        width,
        height,
    })
}

pub(crate) fn maybe_hflip(
    img: &mut RgbImage,
    label: Option<&mut RgbImage>,
    prob: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
        if let Some(label) = label {
            image::imageops::flip_horizontal_in_place(label);
        }
    }
}

pub(crate) fn maybe_jitter(
    img: &mut RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_noise(
    img: &mut RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise = rng.random_range(-strength..strength);
            let v = (pixel[c] as f32 / 255.0 + noise).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0) as u8;
        }
    }
}
