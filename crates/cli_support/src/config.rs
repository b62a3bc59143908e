use std::path::{Path, PathBuf};

use data_contracts::{ClassEntry, ClassPalette, ImageShape};
use serde::Deserialize;

pub const DEFAULT_CONFIG_NAME: &str = "roadseg.toml";
pub const CONFIG_ENV: &str = "ROADSEG_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub data_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub vgg_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub image_shape: ImageShape,
    pub palette: ClassPalette,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub keep_prob: f64,
    pub display_step: usize,
    pub seed: u64,
    pub threshold: f32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            vgg_dir: data_dir.join("vgg"),
            data_dir,
            runs_dir: PathBuf::from("./runs"),
            checkpoint_dir: PathBuf::from("checkpoints/fcn8"),
            image_shape: ImageShape::KITTI,
            palette: ClassPalette::kitti_road(),
            epochs: 20,
            batch_size: 5,
            learning_rate: 0.001,
            keep_prob: 0.5,
            display_step: 1,
            seed: 42,
            threshold: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ToolConfigFile {
    data: Option<DataSection>,
    model: Option<ModelSection>,
    train: Option<TrainSection>,
    infer: Option<InferSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DataSection {
    data_dir: Option<String>,
    runs_dir: Option<String>,
    vgg_dir: Option<String>,
    checkpoint_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
    height: Option<usize>,
    width: Option<usize>,
    classes: Option<Vec<ClassEntry>>,
    background_index: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainSection {
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    keep_prob: Option<f64>,
    display_step: Option<usize>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferSection {
    threshold: Option<f32>,
}

impl ToolConfig {
    /// `$ROADSEG_CONFIG` if set, else `./roadseg.toml`, else defaults.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        Self::from_path(&path).unwrap_or_default()
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("config: cannot read {}: {e}; using defaults", path.display());
                return None;
            }
        };
        match Self::from_toml_str(&raw) {
            Ok(cfg) => {
                log::info!("config: loaded {}", path.display());
                Some(cfg)
            }
            Err(e) => {
                log::warn!("config: cannot parse {}: {e}; using defaults", path.display());
                None
            }
        }
    }

    /// Parse a config document; out-of-range values are replaced by defaults.
    /// Unknown sections or keys are a parse error.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ToolConfigFile = toml::from_str(raw)?;
        let cfg = Self::from_file(file);
        Ok(cfg.sanitized())
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let defaults = ToolConfig::default();
        let data = file.data.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let train = file.train.unwrap_or_default();
        let infer = file.infer.unwrap_or_default();

        let data_dir = data
            .data_dir
            .map(|v| expand_path(&v))
            .unwrap_or(defaults.data_dir);
        let vgg_dir = data
            .vgg_dir
            .map(|v| expand_path(&v))
            .unwrap_or_else(|| data_dir.join("vgg"));

        let palette = match model.classes {
            Some(classes) => ClassPalette {
                classes,
                background_index: model.background_index.unwrap_or(0),
            },
            None => defaults.palette,
        };

        ToolConfig {
            data_dir,
            vgg_dir,
            runs_dir: data
                .runs_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.runs_dir),
            checkpoint_dir: data
                .checkpoint_dir
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.checkpoint_dir),
            image_shape: ImageShape::new(
                model.height.unwrap_or(defaults.image_shape.height),
                model.width.unwrap_or(defaults.image_shape.width),
            ),
            palette,
            epochs: train.epochs.unwrap_or(defaults.epochs),
            batch_size: train.batch_size.unwrap_or(defaults.batch_size),
            learning_rate: train.learning_rate.unwrap_or(defaults.learning_rate),
            keep_prob: train.keep_prob.unwrap_or(defaults.keep_prob),
            display_step: train.display_step.unwrap_or(defaults.display_step),
            seed: train.seed.unwrap_or(defaults.seed),
            threshold: infer.threshold.unwrap_or(defaults.threshold),
        }
    }

    fn sanitized(mut self) -> Self {
        let defaults = ToolConfig::default();
        if let Err(e) = self.image_shape.validate() {
            log::warn!("config: {e}; using {:?}", defaults.image_shape);
            self.image_shape = defaults.image_shape;
        }
        if let Err(e) = self.palette.validate() {
            log::warn!("config: invalid class palette ({e}); using the KITTI road palette");
            self.palette = defaults.palette;
        }
        if self.batch_size == 0 {
            log::warn!("config: train.batch_size must be positive; using {}", defaults.batch_size);
            self.batch_size = defaults.batch_size;
        }
        if self.display_step == 0 {
            log::warn!("config: train.display_step must be positive; using 1");
            self.display_step = defaults.display_step;
        }
        if !(self.learning_rate > 0.0) {
            log::warn!(
                "config: train.learning_rate {} is not positive; using {}",
                self.learning_rate,
                defaults.learning_rate
            );
            self.learning_rate = defaults.learning_rate;
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            log::warn!(
                "config: train.keep_prob {} outside (0, 1]; using {}",
                self.keep_prob,
                defaults.keep_prob
            );
            self.keep_prob = defaults.keep_prob;
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            log::warn!(
                "config: infer.threshold {} outside [0, 1]; using {}",
                self.threshold,
                defaults.threshold
            );
            self.threshold = defaults.threshold;
        }
        if self.epochs == 0 {
            log::warn!("config: train.epochs is 0; training will only save an untrained model");
        }
        self
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

/// Substitute `${VAR}` occurrences; unknown variables are left as written.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&rest[start..start + end + 3]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
