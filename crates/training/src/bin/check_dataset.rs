//! Check a KITTI road dataset folder before training.

use clap::Parser;
use cli_support::{init_logging, DataArgs, ToolConfig};
use data_contracts::DatasetLayout;
use road_dataset::{
    check_layout, index_training, summarize_training, training_dir, validate_training_summary,
    ValidationOutcome, ValidationThresholds,
};

#[derive(Parser, Debug)]
#[command(name = "check_dataset", about = "Validate the data_road layout and image/label pairing")]
struct Args {
    #[command(flatten)]
    data: DataArgs,
    /// Print the reports as JSON instead of log lines.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let cfg = ToolConfig::load();
    let data_dir = args.data.data_dir(&cfg);

    let layout = check_layout(&data_dir, &DatasetLayout::kitti_road());
    let indices = index_training(&training_dir(&data_dir)).unwrap_or_else(|e| {
        log::warn!("cannot index training split: {e}");
        Vec::new()
    });
    let summary = validate_training_summary(
        summarize_training(&indices),
        &ValidationThresholds::from_env(),
    );

    if args.json {
        let out = serde_json::json!({ "layout": layout, "training": summary });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for count in &layout.counts {
            log::info!(
                "{}: {} files (expected {})",
                count.dir.display(),
                count.found,
                count.expected
            );
        }
        log::info!(
            "training pairs: {} of {} images ({})",
            summary.summary.paired,
            summary.summary.images,
            summary.outcome.as_str()
        );
        for reason in layout.reasons.iter().chain(&summary.reasons) {
            log::warn!("{reason}");
        }
    }

    if layout.outcome == ValidationOutcome::Fail || summary.outcome == ValidationOutcome::Fail {
        anyhow::bail!("dataset at {} failed validation", data_dir.display());
    }
    Ok(())
}
