//! End-to-end checks over a synthetic KITTI-style folder:
//! index -> pair -> batch, plus the layout check.

use burn::tensor::Tensor;
use data_contracts::{DatasetLayout, ImageShape, SplitCounts};
use image::{Rgb, RgbImage};
use road_dataset::{
    check_layout, index_images, index_training, summarize_training, BatchIter, DatasetConfig,
    RoadDatasetError, TransformPipelineBuilder, ValidationOutcome,
};
use std::fs;
use std::path::Path;

type B = burn_ndarray::NdArray<f32>;

/// Writes `count` images (64x32) and, for the first `labelled`, road and lane masks.
/// The left half of every mask is background (red), the right half road (magenta).
fn create_split(root: &Path, count: usize, labelled: usize) -> anyhow::Result<()> {
    let image_dir = root.join("image_2");
    let gt_dir = root.join("gt_image_2");
    let calib_dir = root.join("calib");
    fs::create_dir_all(&image_dir)?;
    fs::create_dir_all(&gt_dir)?;
    fs::create_dir_all(&calib_dir)?;
    for i in 0..count {
        let name = format!("um_{i:06}.png");
        RgbImage::from_pixel(64, 32, Rgb([(i * 40) as u8, 128, 200])).save(image_dir.join(&name))?;
        fs::write(calib_dir.join(format!("um_{i:06}.txt")), "P0: 0")?;
        if i < labelled {
            let mut mask = RgbImage::new(64, 32);
            for (x, _, p) in mask.enumerate_pixels_mut() {
                *p = if x < 32 { Rgb([255, 0, 0]) } else { Rgb([255, 0, 255]) };
            }
            mask.save(gt_dir.join(format!("um_road_{i:06}.png")))?;
            // Lane masks are ignored by the pairing.
            RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]))
                .save(gt_dir.join(format!("um_lane_{i:06}.png")))?;
        }
    }
    Ok(())
}

fn small_config() -> DatasetConfig {
    DatasetConfig {
        target_shape: ImageShape::new(32, 64),
        shuffle: false,
        ..Default::default()
    }
}

#[test]
fn index_pairs_images_with_road_masks_only() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 3, 2)?;

    let indices = index_training(tmp.path())?;
    assert_eq!(indices.len(), 3);
    assert!(indices[0]
        .label_path
        .as_ref()
        .is_some_and(|p| p.ends_with("um_road_000000.png")));
    assert!(indices[2].label_path.is_none());

    let summary = summarize_training(&indices);
    assert_eq!((summary.paired, summary.unpaired), (2, 1));

    assert_eq!(index_images(tmp.path())?.len(), 3);
    Ok(())
}

#[test]
fn batches_carry_one_hot_labels() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 3, 3)?;
    let device = Default::default();

    let mut iter = BatchIter::from_training_folder(tmp.path(), small_config())?;
    assert_eq!(iter.num_batches(2), 2);

    let batch = iter
        .next_batch::<B>(2, &device)?
        .expect("first batch");
    assert_eq!(batch.images.dims(), [2, 3, 32, 64]);
    assert_eq!(batch.labels.dims(), [2, 32, 64, 2]);
    assert_eq!(batch.class_maps.dims(), [2, 32, 64]);

    // Exactly one class is hot at every pixel.
    let per_pixel: Tensor<B, 4> = batch.labels.clone().sum_dim(3);
    let sums = per_pixel.into_data().to_vec::<f32>().expect("f32 data");
    assert!(sums.iter().all(|v| (*v - 1.0).abs() < 1e-6));

    // Half of the pixels are road.
    let road: f32 = batch
        .class_maps
        .clone()
        .float()
        .mean()
        .into_data()
        .to_vec::<f32>()
        .expect("f32 data")[0];
    assert!((road - 0.5).abs() < 1e-6);

    let last = iter.next_batch::<B>(2, &device)?.expect("partial batch");
    assert_eq!(last.images.dims()[0], 1);
    assert!(iter.next_batch::<B>(2, &device)?.is_none());

    iter.reset();
    assert_eq!(iter.epoch(), 1);
    assert!(iter.next_batch::<B>(2, &device)?.is_some());
    Ok(())
}

#[test]
fn drop_last_skips_partial_batch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 3, 3)?;
    let device = Default::default();
    let cfg = DatasetConfig {
        drop_last: true,
        ..small_config()
    };
    let mut iter = BatchIter::from_training_folder(tmp.path(), cfg)?;
    assert_eq!(iter.num_batches(2), 1);
    assert!(iter.next_batch::<B>(2, &device)?.is_some());
    assert!(iter.next_batch::<B>(2, &device)?.is_none());
    Ok(())
}

#[test]
fn unlabelled_images_skip_or_fail() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 2, 1)?;
    let device = Default::default();

    let mut permissive = BatchIter::from_training_folder(tmp.path(), small_config())?;
    let batch = permissive.next_batch::<B>(2, &device)?.expect("batch");
    assert_eq!(batch.images.dims()[0], 1);
    assert_eq!(permissive.skipped(), (1, 0));

    let mut strict = BatchIter::from_training_folder(tmp.path(), small_config())?.strict();
    let err = strict.next_batch::<B>(2, &device).unwrap_err();
    assert!(matches!(err, RoadDatasetError::MissingLabel { .. }));
    Ok(())
}

#[test]
fn layout_check_counts_every_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let road = tmp.path().join("data_road");
    create_split(&road.join("training"), 2, 2)?;
    create_split(&road.join("testing"), 1, 0)?;

    let layout = DatasetLayout {
        root_subdir: "data_road".into(),
        training: SplitCounts {
            calib: 2,
            image_2: 2,
            gt_image_2: Some(4),
        },
        testing: SplitCounts {
            calib: 1,
            image_2: 1,
            gt_image_2: None,
        },
    };
    let report = check_layout(tmp.path(), &layout);
    assert_eq!(report.outcome, ValidationOutcome::Pass, "{:?}", report.reasons);
    assert_eq!(report.counts.len(), 5);

    let report = check_layout(tmp.path(), &DatasetLayout::kitti_road());
    assert_eq!(report.outcome, ValidationOutcome::Fail);
    assert!(report.reasons.iter().any(|r| r.contains("expected 289")));
    Ok(())
}

/// Road-left images over the usual road-right masks, so a flip shows in both.
fn create_asymmetric_split(root: &Path, count: usize) -> anyhow::Result<()> {
    create_split(root, count, count)?;
    for i in 0..count {
        let mut img = RgbImage::new(64, 32);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = if x < 32 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
        }
        img.save(root.join("image_2").join(format!("um_{i:06}.png")))?;
    }
    Ok(())
}

/// Per epoch, which samples came out flipped.
fn flips_per_epoch(root: &Path, epochs: usize) -> anyhow::Result<Vec<Vec<bool>>> {
    let device = Default::default();
    let cfg = DatasetConfig {
        flip_horizontal_prob: 0.5,
        seed: Some(42),
        ..small_config()
    };
    let mut iter = BatchIter::from_training_folder(root, cfg)?.strict();
    let plane = 32 * 64;
    let mut out = Vec::new();
    for _ in 0..epochs {
        let batch = iter.next_batch::<B>(8, &device)?.expect("batch");
        let images = batch.images.into_data().to_vec::<f32>().expect("f32 data");
        let classes = batch.class_maps.into_data().to_vec::<i64>().expect("i64 data");
        let flipped: Vec<bool> = (0..8).map(|b| images[b * 3 * plane] > 0.5).collect();
        for (b, f) in flipped.iter().enumerate() {
            // Flipped masks put road on the left.
            assert_eq!(classes[b * plane] == 1, *f);
        }
        out.push(flipped);
        iter.reset();
    }
    Ok(out)
}

#[test]
fn seeded_augmentation_varies_by_epoch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_asymmetric_split(tmp.path(), 8)?;

    let epochs = flips_per_epoch(tmp.path(), 10)?;
    assert!(epochs.iter().any(|p| p != &epochs[0]), "{epochs:?}");
    assert_eq!(epochs, flips_per_epoch(tmp.path(), 10)?);
    Ok(())
}

#[test]
fn transform_with_other_shape_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 2, 2)?;
    let cfg = DatasetConfig {
        transform: Some(
            TransformPipelineBuilder::new()
                .target_shape(ImageShape::new(32, 32))
                .build(),
        ),
        ..small_config()
    };
    let err = BatchIter::from_training_folder(tmp.path(), cfg)
        .err()
        .expect("mismatched transform");
    assert!(matches!(err, RoadDatasetError::Other(ref msg) if msg.contains("32x32")));
    Ok(())
}
