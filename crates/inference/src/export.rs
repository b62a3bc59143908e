//! Run a segmenter over images and write overlays.

use crate::{InferenceError, InferenceResult};
use data_contracts::{ClassPalette, ImageShape};
use image::imageops::FilterType;
use image::RgbaImage;
use road_dataset::{index_images, testing_dir};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use vision_core::interfaces::{Frame, SegmentationResult, Segmenter};
use vision_core::overlay::paint_overlay;

/// Resize a frame to `shape`, segment it and paint the overlay onto the resized image.
pub fn segment_frame<S: Segmenter + ?Sized>(
    segmenter: &mut S,
    frame: &Frame,
    shape: ImageShape,
    palette: &ClassPalette,
) -> InferenceResult<(RgbaImage, SegmentationResult)> {
    let (w, h) = shape.wh_u32();
    let image = frame.to_rgba_image()?;
    let image = if image.dimensions() == (w, h) {
        image
    } else {
        image::imageops::resize(&image, w, h, FilterType::Triangle)
    };
    let resized = Frame::from_image(frame.id, &image, frame.path.clone());
    let result = segmenter.segment(&resized);
    let mut street = image;
    paint_overlay(&mut street, &result, palette)?;
    Ok((street, result))
}

pub fn segment_file<S: Segmenter + ?Sized>(
    segmenter: &mut S,
    id: u64,
    path: &Path,
    shape: ImageShape,
    palette: &ClassPalette,
) -> InferenceResult<(RgbaImage, SegmentationResult)> {
    let frame = Frame::open(id, path)?;
    segment_frame(segmenter, &frame, shape, palette)
}

/// Overlays for every image of `<data_folder>/image_2`, yielded as `(file name, image)`.
pub fn gen_test_output<'a, S: Segmenter + ?Sized>(
    segmenter: &'a mut S,
    data_folder: &Path,
    shape: ImageShape,
    palette: &'a ClassPalette,
) -> InferenceResult<impl Iterator<Item = InferenceResult<(String, RgbaImage)>> + 'a> {
    let images = index_images(data_folder)?;
    Ok(images.into_iter().map(move |idx| {
        let name = idx
            .image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{:06}.png", idx.id));
        let (overlay, _) = segment_file(segmenter, idx.id, &idx.image_path, shape, palette)?;
        Ok((name, overlay))
    }))
}

/// Segment the testing split and write overlays to `<runs_dir>/<unix time>/`.
///
/// An existing output directory of the same name is replaced.
pub fn save_inference_samples<S: Segmenter + ?Sized>(
    runs_dir: &Path,
    data_dir: &Path,
    segmenter: &mut S,
    shape: ImageShape,
    palette: &ClassPalette,
) -> InferenceResult<PathBuf> {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let output_dir = runs_dir.join(stamp.to_string());
    let io_err = |source| InferenceError::Io {
        path: output_dir.clone(),
        source,
    };
    if output_dir.exists() {
        std::fs::remove_dir_all(&output_dir).map_err(io_err)?;
    }
    std::fs::create_dir_all(&output_dir).map_err(io_err)?;

    log::info!(
        "Training Finished. Saving test images to: {}",
        output_dir.display()
    );
    let mut written = 0usize;
    for item in gen_test_output(segmenter, &testing_dir(data_dir), shape, palette)? {
        let (name, image) = item?;
        let path = output_dir.join(&name);
        image
            .save(&path)
            .map_err(|source| InferenceError::Save { path, source })?;
        written += 1;
    }
    log::info!("wrote {written} overlays to {}", output_dir.display());
    Ok(output_dir)
}
