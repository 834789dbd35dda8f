//! Lazy row-producing image graph.
//!
//! Every node implements [`ImageNode`]: a georeferenced raster that yields
//! one line of samples at a time. Requests assemble nodes into a tree
//! (decoders at the leaves, mosaics / resamplers / analytic derivations
//! above them) and the encoder at the root pulls lines through the whole
//! graph. Nodes are created per request and dropped with the root.

mod aspect;
pub mod codec;
mod compound;
mod converted;
mod converter;
mod decimated;
mod empty;
mod encoder;
pub mod file;
mod hillshade;
mod kernel;
mod merge;
mod mirror;
mod resampled;
mod reprojected;
mod samples;
mod slope;
mod style;
mod styled;
mod traits;
mod window;

pub use aspect::{AspectImage, AspectParams};
pub use compound::{CompoundImage, ExtendedCompoundImage, ExtendedCompoundMask};
pub use converted::ConvertedChannelsImage;
pub use converter::PixelConverter;
pub use decimated::DecimatedImage;
pub use empty::EmptyImage;
pub use encoder::{encode_image, OutputFormat};
pub use file::FileImage;
pub use hillshade::{HillshadeImage, HillshadeParams};
pub use kernel::Kernel;
pub use merge::{MergeImage, MergeMethod};
pub use mirror::{mirror_size_for, MirrorImage};
pub use resampled::ResampledImage;
pub use reprojected::ReprojectedImage;
pub use slope::{SlopeImage, SlopeParams, SlopeUnit};
pub use style::{AnalyticStage, Palette, Style};
pub use styled::StyledImage;
pub use traits::{ImageMeta, ImageNode, MaskAdapter, MaskedImage, SharedImage};
