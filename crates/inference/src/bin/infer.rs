use anyhow::Context;
use clap::Parser;
use cli_support::{init_logging, BackendArgs, BackendKind, DataArgs, ToolConfig};
use inference::prelude::*;
use std::path::{Path, PathBuf};
use vision_core::interfaces::{Frame, FrameError, FrameSource, ImageFolderSource, Segmenter};
use vision_core::overlay::class_map_to_rgb;

#[derive(Parser, Debug)]
#[command(name = "infer", about = "Paint road segmentation overlays with a trained FCN-8 checkpoint")]
struct InferArgs {
    #[command(flatten)]
    data: DataArgs,
    #[command(flatten)]
    backend: BackendArgs,
    /// Checkpoint directory holding model.bin and config.json.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Single image or folder of PNGs; defaults to the KITTI testing split.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Output directory for --input runs (defaults to the runs dir).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Road probability above which a pixel is painted.
    #[arg(long)]
    threshold: Option<f32>,
    /// Also write the flat class-colour mask next to each overlay.
    #[arg(long, default_value_t = false)]
    save_mask: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = InferArgs::parse();
    let cfg = ToolConfig::load();

    if args.backend.backend == BackendKind::Wgpu && !cfg!(feature = "backend-wgpu") {
        anyhow::bail!(
            "backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend"
        );
    }

    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| cfg.checkpoint_dir.clone());
    let thresholds = InferenceThresholds {
        threshold: args.threshold.unwrap_or(cfg.threshold),
    };
    let loaded = SegmentationFactory.try_load(Some(&checkpoint), thresholds);
    let (shape, palette) = match &loaded {
        Some(seg) => (seg.image_shape(), seg.palette().clone()),
        None => (cfg.image_shape, cfg.palette.clone()),
    };
    let mut segmenter: Box<dyn Segmenter + Send> = match loaded {
        Some(seg) => Box::new(seg),
        None => SegmentationFactory.build(None, thresholds, &palette),
    };

    let Some(input) = args.input.as_deref() else {
        let runs_dir = args.data.runs_dir(&cfg);
        let data_dir = args.data.data_dir(&cfg);
        let out = save_inference_samples(&runs_dir, &data_dir, segmenter.as_mut(), shape, &palette)
            .with_context(|| format!("failed to export samples for {}", data_dir.display()))?;
        println!("{}", out.display());
        return Ok(());
    };

    let output_dir = args.output.clone().unwrap_or_else(|| args.data.runs_dir(&cfg));
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let frames: Box<dyn Iterator<Item = Result<Frame, FrameError>>> = if input.is_dir() {
        let mut source = ImageFolderSource::new(input)?;
        log::info!("segmenting {} images from {}", source.remaining(), input.display());
        Box::new(std::iter::from_fn(move || source.next_frame()))
    } else {
        Box::new(std::iter::once(Frame::open(0, input)))
    };

    let road = 1 - palette.background_index.min(1);
    for frame in frames {
        let frame = frame?;
        let (overlay, result) = segment_frame(segmenter.as_mut(), &frame, shape, &palette)
            .with_context(|| format!("failed to segment {}", frame.file_name()))?;
        let stem = file_stem(&frame.file_name());
        let overlay_path = output_dir.join(format!("{stem}_overlay.png"));
        overlay
            .save(&overlay_path)
            .with_context(|| format!("failed to write {}", overlay_path.display()))?;
        if args.save_mask {
            let mask_path = output_dir.join(format!("{stem}_mask.png"));
            class_map_to_rgb(&result, &palette)
                .save(&mask_path)
                .with_context(|| format!("failed to write {}", mask_path.display()))?;
        }
        log::info!(
            "{}: {:.1}% road -> {}",
            frame.file_name(),
            result.fraction(road) * 100.0,
            overlay_path.display()
        );
    }
    Ok(())
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
