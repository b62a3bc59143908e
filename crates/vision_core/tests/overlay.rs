use data_contracts::ClassPalette;
use image::{Rgba, RgbaImage};
use vision_core::prelude::*;

fn half_road(width: u32, height: u32) -> SegmentationResult {
    let class_map = (0..width * height)
        .map(|i| u8::from(i % width >= width / 2))
        .collect();
    SegmentationResult::from_class_map(7, width, height, class_map, 2)
}

#[test]
fn road_pixels_are_tinted_and_background_kept() {
    let palette = ClassPalette::kitti_road();
    let mut img = RgbaImage::from_pixel(4, 2, Rgba([100, 100, 100, 255]));
    let result = half_road(4, 2);
    assert_eq!(result.fraction(1), 0.5);

    paint_overlay(&mut img, &result, &palette).expect("sizes match");
    assert_eq!(img.get_pixel(0, 0), &Rgba([100, 100, 100, 255]));
    assert_eq!(img.get_pixel(3, 1), &Rgba([50, 177, 50, 255]));
}

#[test]
fn overlay_rejects_mismatched_sizes() {
    let mut img = RgbaImage::new(5, 2);
    let err = paint_overlay(&mut img, &half_road(4, 2), &ClassPalette::kitti_road()).unwrap_err();
    assert_eq!(err.map_w, 4);
    assert_eq!(err.image_w, 5);
}

#[test]
fn class_map_colours_follow_label_palette() {
    let rgb = class_map_to_rgb(&half_road(4, 1), &ClassPalette::kitti_road());
    assert_eq!(rgb.get_pixel(0, 0).0, [255, 0, 0]);
    assert_eq!(rgb.get_pixel(3, 0).0, [255, 0, 255]);
}

#[test]
fn folder_source_yields_sorted_png_frames() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.png"] {
        RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255]))
            .save(tmp.path().join(name))
            .unwrap();
    }
    std::fs::write(tmp.path().join("notes.txt"), "skip me").unwrap();

    let mut source = ImageFolderSource::new(tmp.path()).unwrap();
    assert_eq!(source.remaining(), 2);
    let first = source.next_frame().unwrap().unwrap();
    assert_eq!(first.file_name(), "a.png");
    assert_eq!(first.size, (3, 2));
    assert_eq!(first.to_rgba_image().unwrap().get_pixel(2, 1), &Rgba([1, 2, 3, 255]));
    let second = source.next_frame().unwrap().unwrap();
    assert_eq!(second.id, 1);
    assert!(source.next_frame().is_none());
}

#[test]
fn frame_without_data_reports_empty() {
    let frame = Frame {
        id: 3,
        rgba: None,
        size: (1, 1),
        path: None,
    };
    assert!(matches!(frame.to_rgba_image(), Err(FrameError::Empty(3))));
    assert_eq!(frame.file_name(), "frame_000003.png");
}
