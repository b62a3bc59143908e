pub mod common;
pub mod config;

pub use common::{init_logging, BackendArgs, BackendKind, DataArgs, ModelShapeArgs};
pub use config::{ToolConfig, CONFIG_ENV, DEFAULT_CONFIG_NAME};
