use data_contracts::{ClassEntry, ClassPalette, ValidationError};

#[test]
fn kitti_palette_maps_red_to_background() {
    let palette = ClassPalette::kitti_road();
    assert!(palette.validate().is_ok());
    assert_eq!(palette.num_classes(), 2);
    assert_eq!(palette.class_for_color([255, 0, 0]), 0);
    assert_eq!(palette.class_for_color([255, 0, 255]), 1);
    // Lane markings and other colours count as road.
    assert_eq!(palette.class_for_color([0, 0, 0]), 1);
    assert_eq!(palette.overlay_color(0), None);
    assert_eq!(palette.overlay_color(1), Some([0, 255, 0, 127]));
}

#[test]
fn multiclass_unmatched_falls_back_to_background() {
    let mut palette = ClassPalette::kitti_road();
    palette.classes.push(ClassEntry {
        name: "lane".into(),
        label_color: [0, 0, 255],
        overlay_color: [0, 0, 255, 127],
    });
    assert_eq!(palette.class_for_color([0, 0, 255]), 2);
    assert_eq!(palette.class_for_color([12, 34, 56]), 0);
}

#[test]
fn duplicate_colours_rejected() {
    let mut palette = ClassPalette::kitti_road();
    palette.classes[1].label_color = [255, 0, 0];
    let err = palette.validate().unwrap_err();
    assert!(matches!(err, ValidationError::DuplicateLabelColor { .. }));
}

#[test]
fn palette_round_trips_through_json() {
    let palette = ClassPalette::kitti_road();
    let raw = serde_json::to_string(&palette).expect("serialize");
    let back: ClassPalette = serde_json::from_str(&raw).expect("deserialize");
    assert_eq!(back, palette);
}
