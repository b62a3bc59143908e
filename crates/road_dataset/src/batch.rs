//! Batch iteration for training and evaluation.

use crate::aug::{DatasetConfig, TransformPipeline};
use crate::index::{index_training, load_sample_for_epoch};
use crate::types::{DatasetResult, RoadDatasetError, SampleIndex, SegmentationSample};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::time::Instant;

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 500;

/// One batch of training data on a Burn device.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// `[N, 3, H, W]`, values in [0, 1].
    pub images: Tensor<B, 4>,
    /// One-hot `[N, H, W, C]`.
    pub labels: Tensor<B, 4>,
    /// Class index per pixel `[N, H, W]`.
    pub class_maps: Tensor<B, 3, Int>,
    pub ids: Vec<u64>,
}

pub struct BatchIter {
    indices: Vec<SampleIndex>,
    cursor: usize,
    epoch: usize,
    cfg: DatasetConfig,
    pipeline: TransformPipeline,
    rng: StdRng,
    processed_samples: usize,
    processed_batches: usize,
    skipped_missing: usize,
    skipped_errors: usize,
    started: Instant,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    permissive_errors: bool,
    images_buf: Vec<f32>,
    labels_buf: Vec<f32>,
    class_buf: Vec<i64>,
}

impl BatchIter {
    /// Index `<data_folder>/image_2` + `gt_image_2` and iterate over the pairs.
    pub fn from_training_folder(data_folder: &Path, cfg: DatasetConfig) -> DatasetResult<Self> {
        let indices = index_training(data_folder)?;
        Self::from_indices(indices, cfg)
    }

    pub fn from_indices(mut indices: Vec<SampleIndex>, cfg: DatasetConfig) -> DatasetResult<Self> {
        cfg.palette.validate()?;
        if cfg.target_shape.pixels() == 0 {
            return Err(RoadDatasetError::Other(
                "target shape must be non-empty".to_string(),
            ));
        }
        if let Some(transform) = &cfg.transform {
            if transform.target_shape != cfg.target_shape {
                return Err(RoadDatasetError::Other(format!(
                    "transform resizes to {}x{} but the dataset expects {}x{}",
                    transform.target_shape.height,
                    transform.target_shape.width,
                    cfg.target_shape.height,
                    cfg.target_shape.width
                )));
            }
        }
        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        if cfg.shuffle {
            indices.shuffle(&mut rng);
        }
        let log_every_samples = match std::env::var("ROADSEG_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let permissive_errors = std::env::var("ROADSEG_DATASET_PERMISSIVE")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .map(|v| v == "0" || v == "false" || v == "off")
            .map(|strict| !strict)
            .unwrap_or(true);
        let pipeline = cfg
            .transform
            .clone()
            .unwrap_or_else(|| TransformPipeline::from_config(&cfg));
        log::debug!("dataset pipeline: {}", pipeline.describe());
        Ok(Self {
            indices,
            cursor: 0,
            epoch: 0,
            cfg,
            pipeline,
            rng,
            processed_samples: 0,
            processed_batches: 0,
            skipped_missing: 0,
            skipped_errors: 0,
            started: Instant::now(),
            last_logged_samples: 0,
            log_every_samples,
            permissive_errors,
            images_buf: Vec::new(),
            labels_buf: Vec::new(),
            class_buf: Vec::new(),
        })
    }

    /// Fail on the first unreadable sample instead of skipping it.
    pub fn strict(mut self) -> Self {
        self.permissive_errors = false;
        self
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.cfg
    }

    pub fn num_batches(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        if self.cfg.drop_last {
            self.indices.len() / batch_size
        } else {
            self.indices.len().div_ceil(batch_size)
        }
    }

    pub fn skipped(&self) -> (usize, usize) {
        (self.skipped_missing, self.skipped_errors)
    }

    /// Rewind for the next epoch, reshuffling when configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        if self.cfg.shuffle {
            self.indices.shuffle(&mut self.rng);
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<SegmentationBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.cursor >= self.indices.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.indices.len());
            if self.cfg.drop_last && end - self.cursor < batch_size {
                self.cursor = self.indices.len();
                return Ok(None);
            }
            let slice = &self.indices[self.cursor..end];
            self.cursor = end;

            let pipeline = &self.pipeline;
            let palette = &self.cfg.palette;
            let epoch = self.epoch as u64;
            let loaded: Vec<(usize, DatasetResult<SegmentationSample>)> = slice
                .par_iter()
                .enumerate()
                .map(|(i, idx)| (i, load_sample_for_epoch(idx, pipeline, palette, epoch)))
                .collect();

            let mut samples = Vec::with_capacity(loaded.len());
            for (i, res) in loaded {
                match res {
                    Ok(sample) => samples.push(sample),
                    Err(e) if self.permissive_errors => {
                        if matches!(e, RoadDatasetError::MissingLabel { .. }) {
                            self.skipped_missing += 1;
                        } else {
                            self.skipped_errors += 1;
                        }
                        log::warn!(
                            "skipping sample {}: {e}",
                            slice[i].image_path.display()
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            if samples.is_empty() {
                continue;
            }

            let batch = self.assemble::<B>(&samples, device);
            self.processed_batches += 1;
            self.processed_samples += samples.len();
            self.maybe_log();
            return Ok(Some(batch));
        }
    }

    fn assemble<B: Backend>(
        &mut self,
        samples: &[SegmentationSample],
        device: &B::Device,
    ) -> SegmentationBatch<B> {
        let n = samples.len();
        let h = self.cfg.target_shape.height;
        let w = self.cfg.target_shape.width;
        let c = self.cfg.palette.num_classes();

        self.images_buf.clear();
        self.class_buf.clear();
        self.labels_buf.clear();
        self.labels_buf.resize(n * h * w * c, 0.0);

        for (b, sample) in samples.iter().enumerate() {
            self.images_buf.extend_from_slice(&sample.image_chw);
            for (p, &class) in sample.class_map.iter().enumerate() {
                let class = (class as usize).min(c - 1);
                self.labels_buf[(b * h * w + p) * c + class] = 1.0;
                self.class_buf.push(class as i64);
            }
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(self.images_buf.clone(), [n, 3, h, w]),
            device,
        );
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(self.labels_buf.clone(), [n, h, w, c]),
            device,
        );
        let class_maps = Tensor::<B, 3, Int>::from_data(
            TensorData::new(self.class_buf.clone(), [n, h, w]),
            device,
        );
        SegmentationBatch {
            images,
            labels,
            class_maps,
            ids: samples.iter().map(|s| s.id).collect(),
        }
    }

    fn maybe_log(&mut self) {
        let Some(every) = self.log_every_samples else {
            return;
        };
        if self.processed_samples - self.last_logged_samples < every {
            return;
        }
        self.last_logged_samples = self.processed_samples;
        let secs = self.started.elapsed().as_secs_f32().max(1e-6);
        log::info!(
            "dataset: {} samples in {} batches ({:.1} samples/s), skipped {} missing / {} errors",
            self.processed_samples,
            self.processed_batches,
            self.processed_samples as f32 / secs,
            self.skipped_missing,
            self.skipped_errors
        );
    }
}
