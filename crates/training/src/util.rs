use anyhow::Context;
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use clap::Parser;
use cli_support::{BackendArgs, BackendKind, DataArgs, ModelShapeArgs, ToolConfig};
use data_contracts::DatasetLayout;
use inference::{save_inference_samples, BurnSegmenter};
use models::{
    load_checkpoint, load_vgg, save_checkpoint, CheckpointMeta, Fcn8, Fcn8Config, ModelResult,
    VggConfig,
};
use road_dataset::{
    check_layout, index_training, summarize_training, training_dir, validate_training_summary,
    BatchIter, DatasetConfig, ValidationOutcome, ValidationThresholds,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::loss::{gradient_descent, optimize};
use crate::{ADBackend, TrainBackend};

pub const TRAINING_CONFIG_FILE: &str = "training.json";
pub const TRAIN_REPORT_FILE: &str = "train_report.json";

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub fcn: Fcn8Config,
    #[config(default = 20)]
    pub epochs: usize,
    #[config(default = 5)]
    pub batch_size: usize,
    #[config(default = 0.001)]
    pub learning_rate: f64,
    /// Log the dropout-free loss every this many steps.
    #[config(default = 1)]
    pub display_step: usize,
    #[config(default = 42)]
    pub seed: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainReport {
    pub steps: usize,
    /// Mean training loss of each epoch that produced at least one batch.
    pub epoch_losses: Vec<f32>,
    /// Last loss logged at a display step.
    pub last_loss: Option<f32>,
    /// `(step, loss)` for every display step, counting steps from 0.
    pub display_losses: Vec<(usize, f32)>,
    pub skipped_missing: usize,
    pub skipped_errors: usize,
}

pub fn load_fcn_from_checkpoint<P: AsRef<Path>>(
    dir: P,
    device: &<TrainBackend as Backend>::Device,
) -> ModelResult<(Fcn8<TrainBackend>, CheckpointMeta)> {
    load_checkpoint::<TrainBackend>(dir.as_ref(), device)
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Fine-tune FCN-8 on the KITTI road dataset")]
pub struct TrainArgs {
    #[command(flatten)]
    pub data: DataArgs,
    #[command(flatten)]
    pub shape: ModelShapeArgs,
    #[command(flatten)]
    pub backend: BackendArgs,
    /// Pretrained VGG16 directory (defaults to `<data_dir>/vgg`).
    #[arg(long)]
    pub vgg_dir: Option<PathBuf>,
    /// JSON `VggConfig` for backbones with non-standard widths.
    #[arg(long)]
    pub vgg_config: Option<PathBuf>,
    /// Train from a randomly initialised backbone when no pretrained weights load.
    #[arg(long, default_value_t = false)]
    pub allow_random_init: bool,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Dropout keep probability while training.
    #[arg(long)]
    pub keep_prob: Option<f64>,
    /// Steps between dropout-free loss reports.
    #[arg(long)]
    pub display_step: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Probability of a joint horizontal flip per training sample.
    #[arg(long, default_value_t = 0.0)]
    pub flip_prob: f32,
    /// Checkpoint output directory.
    #[arg(long)]
    pub checkpoint_out: Option<PathBuf>,
    /// Continue when the KITTI file counts do not match.
    #[arg(long, default_value_t = false)]
    pub skip_layout_check: bool,
    /// Skip writing test-split overlays after training.
    #[arg(long, default_value_t = false)]
    pub no_samples: bool,
    /// Road probability threshold for the exported overlays.
    #[arg(long)]
    pub threshold: Option<f32>,
}

pub fn run_train(args: TrainArgs) -> anyhow::Result<TrainReport> {
    validate_backend_choice(args.backend.backend)?;
    let tool_cfg = ToolConfig::load();

    let data_dir = args.data.data_dir(&tool_cfg);
    let runs_dir = args.data.runs_dir(&tool_cfg);
    let shape = args.shape.image_shape(&tool_cfg);
    shape.validate().context("invalid image shape")?;
    let palette = tool_cfg.palette.clone();
    let num_classes = args.shape.num_classes(&tool_cfg);
    anyhow::ensure!(
        num_classes == palette.num_classes(),
        "--num-classes {num_classes} does not match the {} classes of the palette",
        palette.num_classes()
    );

    let layout = check_layout(&data_dir, &DatasetLayout::kitti_road());
    if layout.outcome == ValidationOutcome::Fail {
        if !args.skip_layout_check {
            anyhow::bail!(
                "dataset layout check failed for {}: {}",
                data_dir.display(),
                layout.reasons.join("; ")
            );
        }
        for reason in &layout.reasons {
            log::warn!("layout: {reason}");
        }
    }

    let training_folder = training_dir(&data_dir);
    let indices = index_training(&training_folder).with_context(|| {
        format!(
            "failed to index training data at {}",
            training_folder.display()
        )
    })?;
    let summary = summarize_training(&indices);
    let summary_report =
        validate_training_summary(summary.clone(), &ValidationThresholds::from_env());
    for reason in &summary_report.reasons {
        log::warn!("dataset: {reason}");
    }
    if summary_report.outcome == ValidationOutcome::Fail {
        anyhow::bail!(
            "training data at {} failed validation: {}",
            training_folder.display(),
            summary_report.reasons.join("; ")
        );
    }

    let keep_prob = args.keep_prob.unwrap_or(tool_cfg.keep_prob);
    let vgg_cfg = match &args.vgg_config {
        Some(path) => VggConfig::load(path)
            .map_err(|e| anyhow::anyhow!("failed to read VGG config {}: {e}", path.display()))?,
        None => VggConfig::new(),
    }
    .with_keep_prob(keep_prob);
    let fcn_cfg = Fcn8Config::new()
        .with_num_classes(num_classes)
        .with_vgg(vgg_cfg.clone());
    fcn_cfg.validate()?;

    let training_cfg = TrainingConfig::new(fcn_cfg)
        .with_epochs(args.epochs.unwrap_or(tool_cfg.epochs))
        .with_batch_size(args.batch_size.unwrap_or(tool_cfg.batch_size).max(1))
        .with_learning_rate(args.lr.unwrap_or(tool_cfg.learning_rate))
        .with_display_step(args.display_step.unwrap_or(tool_cfg.display_step).max(1))
        .with_seed(args.seed.unwrap_or(tool_cfg.seed));
    log::info!(
        "Num images: {} Batch size: {}",
        summary.paired,
        training_cfg.batch_size
    );

    let device = <ADBackend as Backend>::Device::default();
    let vgg_dir = args
        .vgg_dir
        .clone()
        .or_else(|| args.data.data_dir.as_ref().map(|d| d.join("vgg")))
        .unwrap_or_else(|| tool_cfg.vgg_dir.clone());
    let backbone = match load_vgg::<ADBackend>(&vgg_dir, &vgg_cfg, &device) {
        Ok(backbone) => backbone,
        Err(e) if args.allow_random_init => {
            log::warn!("{e}; training from a randomly initialised backbone");
            vgg_cfg.init(&device)
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!(
                "failed to load pretrained VGG from {} (pass --allow-random-init to train from scratch)",
                vgg_dir.display()
            )))
        }
    };
    let model = training_cfg.fcn.init_with_backbone(backbone, &device);

    let dataset_cfg = DatasetConfig {
        target_shape: shape,
        palette: palette.clone(),
        flip_horizontal_prob: args.flip_prob,
        seed: Some(training_cfg.seed),
        ..Default::default()
    };
    let mut batches = BatchIter::from_indices(indices, dataset_cfg)?;
    let mut optim = gradient_descent::<ADBackend, Fcn8<ADBackend>>();
    let (model, report) = train_nn(model, &mut optim, &training_cfg, &mut batches, &device)?;

    let ckpt_dir = args
        .checkpoint_out
        .clone()
        .unwrap_or_else(|| tool_cfg.checkpoint_dir.clone());
    let meta = CheckpointMeta::new(training_cfg.fcn.clone(), shape, palette.clone());
    let model = model.valid();
    save_checkpoint(&model, &meta, &ckpt_dir)
        .with_context(|| format!("failed to save checkpoint to {}", ckpt_dir.display()))?;
    let training_cfg_path = ckpt_dir.join(TRAINING_CONFIG_FILE);
    training_cfg
        .save(&training_cfg_path)
        .with_context(|| format!("failed to write {}", training_cfg_path.display()))?;
    let report_path = ckpt_dir.join(TRAIN_REPORT_FILE);
    std::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    if !args.no_samples {
        let threshold = args.threshold.unwrap_or(tool_cfg.threshold);
        let mut segmenter = BurnSegmenter::new(model, meta, threshold, device);
        save_inference_samples(&runs_dir, &data_dir, &mut segmenter, shape, &palette)
            .with_context(|| format!("failed to save inference samples under {}", runs_dir.display()))?;
    }
    Ok(report)
}

/// Run `cfg.epochs` passes of SGD over `batches`.
///
/// Every `display_step` steps the loss of the current batch is recomputed with
/// dropout disabled and logged as `Iter: {step} Loss: {loss}`.
pub fn train_nn<B, O>(
    mut model: Fcn8<B>,
    optim: &mut O,
    cfg: &TrainingConfig,
    batches: &mut BatchIter,
    device: &B::Device,
) -> anyhow::Result<(Fcn8<B>, TrainReport)>
where
    B: AutodiffBackend,
    O: Optimizer<Fcn8<B>, B>,
{
    let num_classes = model.num_classes();
    let batch_size = cfg.batch_size.max(1);
    let display_step = cfg.display_step.max(1);
    let mut report = TrainReport::default();

    for epoch in 0..cfg.epochs {
        if epoch > 0 {
            batches.reset();
        }
        let mut losses = Vec::new();
        while let Some(batch) = batches
            .next_batch::<B>(batch_size, device)
            .context("failed to load training batch")?
        {
            let logits = model.forward(batch.images.clone());
            let (_, loss) = optimize(logits, batch.labels.clone(), num_classes);
            losses.push(scalar(loss.clone().detach()));
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);

            let step = report.steps;
            if step % display_step == 0 {
                // Dropout is off on the inner backend.
                let valid = model.valid();
                let (_, loss) = optimize(
                    valid.forward(batch.images.inner()),
                    batch.labels.inner(),
                    num_classes,
                );
                let loss = scalar(loss);
                log::info!("Iter: {} Loss: {:.6}", step, loss);
                report.last_loss = Some(loss);
                report.display_losses.push((step, loss));
            }
            report.steps += 1;
        }
        if losses.is_empty() {
            log::warn!("epoch {}: no batches produced", epoch + 1);
            continue;
        }
        let avg_loss = losses.iter().sum::<f32>() / losses.len() as f32;
        log::info!(
            "epoch {}/{}: mean loss {avg_loss:.6} over {} batches",
            epoch + 1,
            cfg.epochs,
            losses.len()
        );
        report.epoch_losses.push(avg_loss);
    }

    (report.skipped_missing, report.skipped_errors) = batches.skipped();
    Ok((model, report))
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            log::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend ndarray");
        }
        (BackendKind::NdArray, false) => {
            log::warn!("No GPU found. Please use a GPU to train your neural network.");
        }
        (BackendKind::Wgpu, true) => {
            log::info!("Default GPU backend: wgpu");
        }
    }
    Ok(())
}
