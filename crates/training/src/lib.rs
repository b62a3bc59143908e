#![recursion_limit = "256"]

pub mod loss;
pub mod util;

pub use loss::{cross_entropy_loss, gradient_descent, optimize};
pub use util::{
    load_fcn_from_checkpoint, run_train, train_nn, validate_backend_choice, TrainArgs,
    TrainReport, TrainingConfig, TRAINING_CONFIG_FILE, TRAIN_REPORT_FILE,
};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
