//! roadseg umbrella crate: re-export the segmentation crates with feature wiring.

#[cfg(feature = "data-contracts")]
pub use data_contracts;

#[cfg(feature = "road-dataset")]
pub use road_dataset;

#[cfg(feature = "models")]
pub use models;

#[cfg(feature = "vision-core")]
pub use vision_core;

#[cfg(feature = "inference")]
pub use inference;

#[cfg(feature = "training")]
pub use training;

#[cfg(feature = "cli-support")]
pub use cli_support;
