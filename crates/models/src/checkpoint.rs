//! On-disk FCN checkpoints: `model.bin` plus `config.json` describing how to rebuild it.

use crate::fcn::{Fcn8, Fcn8Config};
use crate::{ModelError, ModelResult};
use burn::config::Config;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use data_contracts::{ClassPalette, ImageShape};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_MODEL_FILE: &str = "model.bin";
pub const CHECKPOINT_CONFIG_FILE: &str = "config.json";

/// Everything needed to rebuild and drive a saved model.
#[derive(Config, Debug)]
pub struct CheckpointMeta {
    pub fcn: Fcn8Config,
    pub image_shape: ImageShape,
    pub palette: ClassPalette,
}

impl CheckpointMeta {
    pub fn validate(&self) -> ModelResult<()> {
        self.fcn.validate()?;
        self.image_shape
            .validate()
            .map_err(|e| ModelError::Config(e.to_string()))?;
        if self.palette.num_classes() != self.fcn.num_classes {
            return Err(ModelError::Config(format!(
                "palette has {} classes but the model predicts {}",
                self.palette.num_classes(),
                self.fcn.num_classes
            )));
        }
        Ok(())
    }
}

pub fn checkpoint_exists(dir: &Path) -> bool {
    dir.join(CHECKPOINT_MODEL_FILE).is_file() && dir.join(CHECKPOINT_CONFIG_FILE).is_file()
}

/// Write `model.bin` and `config.json` into `dir`, creating it if needed.
pub fn save_checkpoint<B: Backend>(
    model: &Fcn8<B>,
    meta: &CheckpointMeta,
    dir: &Path,
) -> ModelResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| ModelError::Save {
        path: dir.to_path_buf(),
        msg: e.to_string(),
    })?;
    let config_path = dir.join(CHECKPOINT_CONFIG_FILE);
    meta.save(&config_path).map_err(|e| ModelError::Save {
        path: config_path.clone(),
        msg: e.to_string(),
    })?;
    let model_path = dir.join(CHECKPOINT_MODEL_FILE);
    model
        .clone()
        .save_file(model_path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())
        .map_err(|e| ModelError::Save {
            path: model_path.clone(),
            msg: e.to_string(),
        })?;
    log::info!("saved checkpoint to {}", dir.display());
    Ok(model_path)
}

pub fn load_checkpoint<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> ModelResult<(Fcn8<B>, CheckpointMeta)> {
    let config_path = dir.join(CHECKPOINT_CONFIG_FILE);
    let meta = CheckpointMeta::load(&config_path).map_err(|e| ModelError::Record {
        path: config_path.clone(),
        msg: e.to_string(),
    })?;
    meta.validate()?;

    let model_path = dir.join(CHECKPOINT_MODEL_FILE);
    let model = meta
        .fcn
        .init::<B>(device)
        .load_file(model_path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new(), device)
        .map_err(|e| ModelError::Record {
            path: model_path.clone(),
            msg: e.to_string(),
        })?;
    model.backbone().layers().check_shapes(&meta.fcn.vgg)?;
    Ok((model, meta))
}
