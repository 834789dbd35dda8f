//! Raster format registry: every enumeration describing how samples are
//! stored, interpreted and compressed, plus the canonical pyramid format
//! tokens combining them.

mod compression;
mod extra_sample;
mod photometric;
mod pyramid_format;
mod sample_format;

pub use compression::Compression;
pub use extra_sample::ExtraSample;
pub use photometric::Photometric;
pub use pyramid_format::PyramidFormat;
pub use sample_format::SampleFormat;
