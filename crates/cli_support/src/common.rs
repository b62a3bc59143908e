use crate::config::ToolConfig;
use clap::{Args, ValueEnum};
use data_contracts::ImageShape;
use std::path::PathBuf;

/// Initialise `env_logger` at `info` unless `RUST_LOG` says otherwise.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

impl BackendKind {
    pub fn is_gpu(self) -> bool {
        matches!(self, BackendKind::Wgpu)
    }
}

/// Backend selection shared by the training and inference binaries.
#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Backend to use (ndarray, or wgpu when built with `backend-wgpu`).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

/// Dataset and output locations. Unset flags fall back to the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct DataArgs {
    /// Directory holding `data_road/` and `vgg/`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Directory inference samples are written under.
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,
}

impl DataArgs {
    pub fn data_dir(&self, cfg: &ToolConfig) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| cfg.data_dir.clone())
    }

    pub fn runs_dir(&self, cfg: &ToolConfig) -> PathBuf {
        self.runs_dir.clone().unwrap_or_else(|| cfg.runs_dir.clone())
    }
}

/// Number of classes and network input size.
#[derive(Debug, Clone, Default, Args)]
pub struct ModelShapeArgs {
    /// Number of segmentation classes (must match the palette).
    #[arg(long)]
    pub num_classes: Option<usize>,
    /// Network input height in pixels (multiple of 32).
    #[arg(long)]
    pub height: Option<usize>,
    /// Network input width in pixels (multiple of 32).
    #[arg(long)]
    pub width: Option<usize>,
}

impl ModelShapeArgs {
    pub fn num_classes(&self, cfg: &ToolConfig) -> usize {
        self.num_classes.unwrap_or_else(|| cfg.palette.num_classes())
    }

    pub fn image_shape(&self, cfg: &ToolConfig) -> ImageShape {
        ImageShape::new(
            self.height.unwrap_or(cfg.image_shape.height),
            self.width.unwrap_or(cfg.image_shape.width),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        data: DataArgs,
        #[command(flatten)]
        shape: ModelShapeArgs,
        #[command(flatten)]
        backend: BackendArgs,
    }

    #[test]
    fn flags_override_config_values() {
        let cli = Cli::parse_from(["t", "--data-dir", "/tmp/kitti", "--height", "320"]);
        let cfg = ToolConfig::default();
        assert_eq!(cli.data.data_dir(&cfg), PathBuf::from("/tmp/kitti"));
        assert_eq!(cli.data.runs_dir(&cfg), cfg.runs_dir);
        assert_eq!(cli.shape.image_shape(&cfg), ImageShape::new(320, 576));
        assert_eq!(cli.shape.num_classes(&cfg), 2);
        assert_eq!(cli.backend.backend, BackendKind::NdArray);
    }

    #[test]
    fn backend_flag_parses_wgpu() {
        let cli = Cli::parse_from(["t", "--backend", "wgpu"]);
        assert!(cli.backend.backend.is_gpu());
    }
}
