use cli_support::ToolConfig;
use data_contracts::ImageShape;
use std::path::PathBuf;

#[test]
fn missing_file_yields_none() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(ToolConfig::from_path(&tmp.path().join("roadseg.toml")).is_none());
}

#[test]
fn file_values_override_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("roadseg.toml");
    std::fs::write(
        &path,
        r#"
[data]
data_dir = "/datasets/kitti"
checkpoint_dir = "/models/fcn8"

[model]
height = 320
width = 1152

[train]
epochs = 3
batch_size = 2
learning_rate = 0.0005

[infer]
threshold = 0.7
"#,
    )
    .unwrap();

    let cfg = ToolConfig::from_path(&path).expect("config parses");
    assert_eq!(cfg.data_dir, PathBuf::from("/datasets/kitti"));
    assert_eq!(cfg.vgg_dir, PathBuf::from("/datasets/kitti/vgg"));
    assert_eq!(cfg.checkpoint_dir, PathBuf::from("/models/fcn8"));
    assert_eq!(cfg.image_shape, ImageShape::new(320, 1152));
    assert_eq!(cfg.epochs, 3);
    assert_eq!(cfg.batch_size, 2);
    assert!((cfg.learning_rate - 0.0005).abs() < 1e-12);
    assert!((cfg.threshold - 0.7).abs() < 1e-6);
    assert_eq!(cfg.keep_prob, 0.5);
    assert_eq!(cfg.palette.num_classes(), 2);
}

#[test]
fn invalid_values_fall_back_to_defaults() {
    let cfg = ToolConfig::from_toml_str(
        r#"
[model]
height = 100

[train]
batch_size = 0
keep_prob = 1.5
learning_rate = -1.0
"#,
    )
    .unwrap();
    let defaults = ToolConfig::default();
    assert_eq!(cfg.image_shape, defaults.image_shape);
    assert_eq!(cfg.batch_size, defaults.batch_size);
    assert_eq!(cfg.keep_prob, defaults.keep_prob);
    assert_eq!(cfg.learning_rate, defaults.learning_rate);
}

#[test]
fn custom_palette_is_read_from_class_tables() {
    let cfg = ToolConfig::from_toml_str(
        r#"
[model]
background_index = 0

[[model.classes]]
name = "background"
label_color = [0, 0, 0]
overlay_color = [0, 0, 0, 0]

[[model.classes]]
name = "road"
label_color = [128, 64, 128]
overlay_color = [0, 255, 0, 127]

[[model.classes]]
name = "car"
label_color = [0, 0, 142]
overlay_color = [255, 0, 0, 127]
"#,
    )
    .unwrap();
    assert_eq!(cfg.palette.num_classes(), 3);
    assert_eq!(cfg.palette.class_for_color([0, 0, 142]), 2);
}

#[test]
fn unparsable_file_uses_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("roadseg.toml");
    std::fs::write(&path, "[train\nepochs = ").unwrap();
    assert!(ToolConfig::from_path(&path).is_none());
}

#[test]
fn unknown_keys_are_rejected() {
    let err = ToolConfig::from_toml_str("[train]\nepoch = 5\n").unwrap_err();
    assert!(err.to_string().contains("epoch"), "{err}");
    assert!(ToolConfig::from_toml_str("[inference]\nthreshold = 0.3\n").is_err());

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("roadseg.toml");
    std::fs::write(&path, "[data]\ndata_dir = \"/srv\"\nrun_dir = \"/tmp\"\n").unwrap();
    assert!(ToolConfig::from_path(&path).is_none());
}
