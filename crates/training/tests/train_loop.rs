//! Training on a tiny synthetic KITTI-style dataset with a narrow backbone.

use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::optim::Optimizer;
use burn::tensor::{Distribution, Tensor};
use clap::Parser;
use data_contracts::ImageShape;
use image::{Rgb, RgbImage};
use models::{Fcn8, Fcn8Config, VggConfig};
use road_dataset::{BatchIter, DatasetConfig};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use training::{
    gradient_descent, load_fcn_from_checkpoint, optimize, run_train, train_nn, ADBackend,
    TrainArgs, TrainBackend, TrainingConfig, TRAINING_CONFIG_FILE, TRAIN_REPORT_FILE,
};

fn tiny_vgg() -> VggConfig {
    VggConfig::new()
        .with_channels([4, 4, 8, 8, 8])
        .with_fc_channels(8)
        .with_fc6_kernel(3)
        .with_keep_prob(1.0)
}

/// Writes `count` 64x32 images: the right half is bright and labelled road.
fn create_split(split: &Path, count: usize, labelled: bool) -> anyhow::Result<()> {
    let image_dir = split.join("image_2");
    let gt_dir = split.join("gt_image_2");
    let calib_dir = split.join("calib");
    fs::create_dir_all(&image_dir)?;
    fs::create_dir_all(&calib_dir)?;
    if labelled {
        fs::create_dir_all(&gt_dir)?;
    }
    for i in 0..count {
        let mut img = RgbImage::new(64, 32);
        let mut mask = RgbImage::new(64, 32);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let road = x >= 32;
            *p = if road {
                Rgb([220, 220, 220])
            } else {
                Rgb([20, (i * 30) as u8, 40])
            };
            mask.put_pixel(
                x,
                y,
                if road {
                    Rgb([255, 0, 255])
                } else {
                    Rgb([255, 0, 0])
                },
            );
        }
        img.save(image_dir.join(format!("um_{i:06}.png")))?;
        fs::write(calib_dir.join(format!("um_{i:06}.txt")), "P0: 0")?;
        if labelled {
            mask.save(gt_dir.join(format!("um_road_{i:06}.png")))?;
        }
    }
    Ok(())
}

fn dataset_config() -> DatasetConfig {
    DatasetConfig {
        target_shape: ImageShape::new(32, 64),
        shuffle: false,
        seed: Some(7),
        ..Default::default()
    }
}

#[test]
fn sgd_steps_reduce_loss_on_a_fixed_batch() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 2, true)?;
    let device = Default::default();

    let mut iter = BatchIter::from_training_folder(tmp.path(), dataset_config())?;
    let batch = iter
        .next_batch::<ADBackend>(2, &device)?
        .expect("one batch");

    let mut model = Fcn8Config::new().with_vgg(tiny_vgg()).init::<ADBackend>(&device);
    let mut optim = gradient_descent::<ADBackend, Fcn8<ADBackend>>();
    let eval = |m: &Fcn8<ADBackend>| -> f32 {
        let (_, loss) = optimize(
            m.valid().forward(batch.images.clone().inner()),
            batch.labels.clone().inner(),
            2,
        );
        loss.into_scalar()
    };

    let before = eval(&model);
    for _ in 0..10 {
        let (_, loss) = optimize(model.forward(batch.images.clone()), batch.labels.clone(), 2);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(0.05, model, grads);
    }
    let after = eval(&model);
    assert!(after < before, "loss went from {before} to {after}");
    Ok(())
}

#[test]
fn train_nn_runs_every_epoch_and_reshuffles() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 3, true)?;
    let device = Default::default();

    let mut batches = BatchIter::from_training_folder(tmp.path(), dataset_config())?;
    let model = Fcn8Config::new().with_vgg(tiny_vgg()).init::<ADBackend>(&device);
    let cfg = TrainingConfig::new(Fcn8Config::new().with_vgg(tiny_vgg()))
        .with_epochs(2)
        .with_batch_size(2)
        .with_learning_rate(0.01)
        .with_display_step(2);
    let mut optim = gradient_descent::<ADBackend, Fcn8<ADBackend>>();

    let (_, report) = train_nn(model, &mut optim, &cfg, &mut batches, &device)?;
    assert_eq!(report.steps, 4);
    assert_eq!(report.epoch_losses.len(), 2);
    assert!(report.epoch_losses.iter().all(|l| l.is_finite()));
    let logged: Vec<usize> = report.display_losses.iter().map(|(step, _)| *step).collect();
    assert_eq!(logged, vec![0, 2]);
    assert_eq!(report.last_loss, report.display_losses.last().map(|(_, l)| *l));
    assert_eq!(batches.epoch(), 1);
    Ok(())
}

#[test]
fn dropout_only_applies_to_the_training_forward() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    create_split(tmp.path(), 2, true)?;
    let device = Default::default();
    let vgg = tiny_vgg().with_fc_channels(16).with_keep_prob(0.5);
    let model = Fcn8Config::new().with_vgg(vgg.clone()).init::<ADBackend>(&device);

    let input = Tensor::<ADBackend, 4>::random([1, 3, 64, 96], Distribution::Default, &device);
    let fc7 = |t: Tensor<ADBackend, 4>| {
        let taps = model.backbone().forward_taps(t);
        taps.layer7_out.into_data().to_vec::<f32>().expect("f32 data")
    };
    assert_ne!(fc7(input.clone()), fc7(input.clone()));

    let valid = model.valid();
    let plain = |t: Tensor<TrainBackend, 4>| t.into_data().to_vec::<f32>().expect("f32 data");
    assert_eq!(
        plain(valid.forward(input.clone().inner())),
        plain(valid.forward(input.inner()))
    );

    // One step over both images: the reported loss is the dropout-free loss of the stepped model.
    let mut batches = BatchIter::from_training_folder(tmp.path(), dataset_config())?;
    let cfg = TrainingConfig::new(Fcn8Config::new().with_vgg(vgg))
        .with_epochs(1)
        .with_batch_size(2)
        .with_learning_rate(0.01);
    let mut optim = gradient_descent::<ADBackend, Fcn8<ADBackend>>();
    let (trained, report) = train_nn(model, &mut optim, &cfg, &mut batches, &device)?;
    let last = report.last_loss.expect("display loss");

    let batch = BatchIter::from_training_folder(tmp.path(), dataset_config())?
        .next_batch::<ADBackend>(2, &device)?
        .expect("batch");
    let eval = || -> f32 {
        let (_, loss) = optimize(
            trained.valid().forward(batch.images.clone().inner()),
            batch.labels.clone().inner(),
            2,
        );
        loss.into_scalar()
    };
    assert!((eval() - last).abs() < 1e-5, "{} vs {last}", eval());
    assert_eq!(eval(), eval());
    Ok(())
}

#[test]
fn run_train_writes_checkpoint_and_samples() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    let road = data_dir.join("data_road");
    create_split(&road.join("training"), 2, true)?;
    create_split(&road.join("testing"), 2, false)?;

    let vgg_cfg_path = tmp.path().join("vgg.json");
    burn::config::Config::save(&tiny_vgg(), &vgg_cfg_path)?;
    let ckpt = tmp.path().join("ckpt");
    let runs = tmp.path().join("runs");

    let argv: Vec<OsString> = vec![
        "train".into(),
        "--data-dir".into(),
        data_dir.clone().into(),
        "--runs-dir".into(),
        runs.clone().into(),
        "--checkpoint-out".into(),
        ckpt.clone().into(),
        "--vgg-config".into(),
        vgg_cfg_path.into(),
        "--height".into(),
        "32".into(),
        "--width".into(),
        "64".into(),
        "--epochs".into(),
        "1".into(),
        "--batch-size".into(),
        "2".into(),
        "--allow-random-init".into(),
        "--skip-layout-check".into(),
    ];
    let args = TrainArgs::parse_from(argv);
    let report = run_train(args)?;
    assert_eq!(report.steps, 1);

    assert!(ckpt.join(TRAINING_CONFIG_FILE).is_file());
    assert!(ckpt.join(TRAIN_REPORT_FILE).is_file());
    let (model, meta) = load_fcn_from_checkpoint(&ckpt, &Default::default())?;
    assert_eq!(model.num_classes(), 2);
    assert_eq!(meta.image_shape, ImageShape::new(32, 64));

    let sample_dirs: Vec<_> = fs::read_dir(&runs)?.collect::<Result<_, _>>()?;
    assert_eq!(sample_dirs.len(), 1);
    assert_eq!(fs::read_dir(sample_dirs[0].path())?.count(), 2);
    Ok(())
}

#[test]
fn missing_vgg_is_an_error_without_random_init() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let data_dir = tmp.path().join("data");
    create_split(&data_dir.join("data_road/training"), 1, true)?;

    let args = TrainArgs::parse_from([
        "train",
        "--data-dir",
        data_dir.to_str().expect("utf-8 temp path"),
        "--skip-layout-check",
        "--no-samples",
    ]);
    let err = run_train(args).unwrap_err();
    assert!(format!("{err:#}").contains("--allow-random-init"), "{err:#}");
    Ok(())
}
