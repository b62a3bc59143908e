//! vision_core: shared frame/segmenter/overlay interfaces.

pub mod interfaces;
pub mod overlay;

pub mod prelude {
    pub use crate::interfaces::*;
    pub use crate::overlay::*;
}
