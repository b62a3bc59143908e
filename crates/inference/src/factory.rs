use crate::segmenter::{BackgroundSegmenter, BurnSegmenter};
use crate::InferenceBackend;
use data_contracts::ClassPalette;
use std::path::Path;
use vision_core::interfaces::Segmenter;

/// Decision threshold for the road class.
#[derive(Debug, Clone, Copy)]
pub struct InferenceThresholds {
    pub threshold: f32,
}

impl Default for InferenceThresholds {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

/// Builds segmenters from checkpoint directories, falling back to background-only output.
pub struct SegmentationFactory;

impl SegmentationFactory {
    /// Without a loadable checkpoint, every pixel gets `fallback`'s background class.
    pub fn build(
        &self,
        weights: Option<&Path>,
        thresh: InferenceThresholds,
        fallback: &ClassPalette,
    ) -> Box<dyn Segmenter + Send> {
        if let Some(seg) = self.try_load(weights, thresh) {
            return Box::new(seg);
        }
        log::warn!("SegmentationFactory: no valid checkpoint provided; using background segmenter.");
        Box::new(BackgroundSegmenter::new(fallback))
    }

    pub fn try_load(
        &self,
        weights: Option<&Path>,
        thresh: InferenceThresholds,
    ) -> Option<BurnSegmenter<InferenceBackend>> {
        let dir = weights?;
        if !models::checkpoint_exists(dir) {
            log::warn!("no checkpoint (model.bin + config.json) in {}", dir.display());
            return None;
        }
        let device = <InferenceBackend as burn::tensor::backend::Backend>::Device::default();
        match models::load_checkpoint::<InferenceBackend>(dir, &device) {
            Ok((model, meta)) => {
                log::info!(
                    "loaded segmenter from {} ({} classes, {}x{})",
                    dir.display(),
                    meta.fcn.num_classes,
                    meta.image_shape.height,
                    meta.image_shape.width
                );
                Some(BurnSegmenter::new(model, meta, thresh.threshold, device))
            }
            Err(err) => {
                log::warn!(
                    "failed to load checkpoint {}: {err}. Falling back to background segmenter.",
                    dir.display()
                );
                None
            }
        }
    }
}
