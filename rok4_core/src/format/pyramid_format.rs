//! Canonical pyramid format tokens.
//!
//! A pyramid format names in one token the container, the tile compression
//! and the sample type of every slab of a pyramid, e.g. `TIFF_RAW_UINT8`,
//! `TIFF_PNG_UINT8` or `TIFF_LZW_FLOAT32`. The token also resolves the MIME
//! type served for a stored tile of that pyramid.

use super::{Compression, SampleFormat};
use anyhow::{Result, bail};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidFormat {
	pub compression: Compression,
	pub sample_format: SampleFormat,
}

impl PyramidFormat {
	pub fn new(compression: Compression, sample_format: SampleFormat) -> PyramidFormat {
		PyramidFormat {
			compression,
			sample_format,
		}
	}

	/// MIME type of an encoded tile in this format.
	pub fn mime_type(&self) -> &'static str {
		match self.compression {
			Compression::Jpeg => "image/jpeg",
			Compression::Png => "image/png",
			Compression::Jpeg2000 => "image/jp2",
			_ => "image/tiff",
		}
	}
}

impl Display for PyramidFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "TIFF_{}_{}", self.compression, self.sample_format)
	}
}

impl FromStr for PyramidFormat {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		let mut parts = value.split('_');
		let (Some(container), Some(compression), Some(sample)) = (parts.next(), parts.next(), parts.next()) else {
			bail!("pyramid format '{value}' does not match TIFF_<compression>_<sampleformat>");
		};
		if container != "TIFF" || parts.next().is_some() {
			bail!("pyramid format '{value}' does not match TIFF_<compression>_<sampleformat>");
		}
		Ok(PyramidFormat {
			compression: compression.parse()?,
			sample_format: sample.parse()?,
		})
	}
}
