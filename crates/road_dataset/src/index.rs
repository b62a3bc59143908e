//! Pairing camera images with ground-truth masks and loading samples.

use crate::aug::{build_sample, TransformPipeline};
use crate::types::{DatasetResult, RoadDatasetError, SampleIndex, SegmentationSample};
use data_contracts::ClassPalette;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const IMAGE_SUBDIR: &str = "image_2";
pub const GT_SUBDIR: &str = "gt_image_2";

static GT_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(lane|road)_").expect("static regex"));

/// `<data_dir>/data_road/training`
pub fn training_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("data_road").join("training")
}

/// `<data_dir>/data_road/testing`
pub fn testing_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("data_road").join("testing")
}

/// Image file name a ground-truth file belongs to (`um_road_000000.png` -> `um_000000.png`).
pub fn gt_key(gt_file_name: &str) -> String {
    GT_TAG.replace_all(gt_file_name, "_").into_owned()
}

fn list_png(dir: &Path, must_contain: Option<&str>) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| RoadDatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("png") {
            continue;
        }
        if let Some(needle) = must_contain {
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if !name.contains(needle) {
                continue;
            }
        }
        out.push(path);
    }
    out.sort();
    Ok(out)
}

/// Index a training split: every `image_2/*.png` paired with its `gt_image_2/*_road_*.png`.
///
/// Images without a road mask are kept with `label_path: None` so callers can
/// decide whether to skip or fail.
pub fn index_training(data_folder: &Path) -> DatasetResult<Vec<SampleIndex>> {
    let images = list_png(&data_folder.join(IMAGE_SUBDIR), None)?;
    let gt_paths = list_png(&data_folder.join(GT_SUBDIR), Some("_road_"))?;
    let labels: HashMap<String, PathBuf> = gt_paths
        .into_iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?.to_string();
            Some((gt_key(&name), p))
        })
        .collect();

    Ok(images
        .into_iter()
        .enumerate()
        .map(|(i, image_path)| {
            let label_path = image_path
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(|name| labels.get(name).cloned());
            SampleIndex {
                id: i as u64,
                image_path,
                label_path,
            }
        })
        .collect())
}

/// Index the images of a split without labels (testing split, ad-hoc folders).
pub fn index_images(data_folder: &Path) -> DatasetResult<Vec<SampleIndex>> {
    let images = list_png(&data_folder.join(IMAGE_SUBDIR), None)?;
    Ok(images
        .into_iter()
        .enumerate()
        .map(|(i, image_path)| SampleIndex {
            id: i as u64,
            image_path,
            label_path: None,
        })
        .collect())
}

fn open_rgb(path: &Path) -> DatasetResult<image::RgbImage> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| RoadDatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Decode, resize and augment one training sample.
pub fn load_sample(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    palette: &ClassPalette,
) -> DatasetResult<SegmentationSample> {
    load_sample_for_epoch(idx, pipeline, palette, 0)
}

/// [`load_sample`] with the augmentation drawn for `epoch`.
pub fn load_sample_for_epoch(
    idx: &SampleIndex,
    pipeline: &TransformPipeline,
    palette: &ClassPalette,
    epoch: u64,
) -> DatasetResult<SegmentationSample> {
    let Some(label_path) = idx.label_path.as_ref() else {
        return Err(RoadDatasetError::MissingLabel {
            image: idx.image_path.clone(),
        });
    };
    let img = open_rgb(&idx.image_path)?;
    let label = open_rgb(label_path)?;
    if img.dimensions() != label.dimensions() {
        return Err(RoadDatasetError::SizeMismatch {
            image: idx.image_path.clone(),
            label: label_path.clone(),
            image_w: img.width(),
            image_h: img.height(),
            label_w: label.width(),
            label_h: label.height(),
        });
    }
    let (img, label) = pipeline.apply_for_epoch(img, Some(label), idx.id, epoch);
    build_sample(&img, label.as_ref(), palette, idx.id)
}
