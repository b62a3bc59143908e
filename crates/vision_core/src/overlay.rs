use crate::interfaces::SegmentationResult;
use data_contracts::ClassPalette;
use image::{Rgb, RgbImage, Rgba, RgbaImage};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("class map is {map_w}x{map_h} but the image is {image_w}x{image_h}")]
pub struct OverlaySizeMismatch {
    pub map_w: u32,
    pub map_h: u32,
    pub image_w: u32,
    pub image_h: u32,
}

/// `src * (1 - a) + color * a` per channel, `a = color.alpha / 255`.
pub fn blend(src: Rgba<u8>, color: [u8; 4]) -> Rgba<u8> {
    let a = color[3] as f32 / 255.0;
    let mix = |s: u8, c: u8| (s as f32 * (1.0 - a) + c as f32 * a).round().clamp(0.0, 255.0) as u8;
    Rgba([
        mix(src[0], color[0]),
        mix(src[1], color[1]),
        mix(src[2], color[2]),
        src[3],
    ])
}

/// Paint each class's overlay colour over the pixels assigned to it.
///
/// Classes whose overlay alpha is zero (background in the KITTI palette) are left untouched.
pub fn paint_overlay(
    image: &mut RgbaImage,
    result: &SegmentationResult,
    palette: &ClassPalette,
) -> Result<(), OverlaySizeMismatch> {
    let (image_w, image_h) = image.dimensions();
    if (result.width, result.height) != (image_w, image_h)
        || result.class_map.len() != (image_w as usize * image_h as usize)
    {
        return Err(OverlaySizeMismatch {
            map_w: result.width,
            map_h: result.height,
            image_w,
            image_h,
        });
    }
    let colors: Vec<Option<[u8; 4]>> = (0..palette.num_classes())
        .map(|c| palette.overlay_color(c))
        .collect();
    for (pixel, &class) in image.pixels_mut().zip(&result.class_map) {
        if let Some(Some(color)) = colors.get(class as usize) {
            *pixel = blend(*pixel, *color);
        }
    }
    Ok(())
}

/// Flat colouring of a class map with each class's label colour.
pub fn class_map_to_rgb(result: &SegmentationResult, palette: &ClassPalette) -> RgbImage {
    let fallback = [0, 0, 0];
    RgbImage::from_fn(result.width, result.height, |x, y| {
        let idx = (y * result.width + x) as usize;
        let class = result.class_map.get(idx).copied().unwrap_or(0) as usize;
        Rgb(palette
            .classes
            .get(class)
            .map(|c| c.label_color)
            .unwrap_or(fallback))
    })
}
