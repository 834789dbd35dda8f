//! Pyramids, levels and tile dispatch.

mod level;
#[allow(clippy::module_inception)]
mod pyramid;

pub use level::{GenerationMode, Level, Source};
pub use pyramid::Pyramid;
