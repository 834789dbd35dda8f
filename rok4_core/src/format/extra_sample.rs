//! Declared meaning of the channel following the color samples.
//!
//! The pipeline computes in unassociated alpha only; associated alpha is
//! un-premultiplied by the file decoders at line boundaries.

use anyhow::{Result, bail};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtraSample {
	#[default]
	None,
	AlphaAssoc,
	AlphaUnassoc,
}

impl ExtraSample {
	pub fn tiff_tag(&self) -> u16 {
		match self {
			ExtraSample::None => 0,
			ExtraSample::AlphaAssoc => 1,
			ExtraSample::AlphaUnassoc => 2,
		}
	}

	pub fn from_tiff_tag(tag: u16) -> Result<ExtraSample> {
		Ok(match tag {
			0 => ExtraSample::None,
			1 => ExtraSample::AlphaAssoc,
			2 => ExtraSample::AlphaUnassoc,
			_ => bail!("unknown TIFF extra sample tag {tag}"),
		})
	}

	pub fn is_associated(&self) -> bool {
		matches!(self, ExtraSample::AlphaAssoc)
	}
}

impl Display for ExtraSample {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			ExtraSample::None => "NONE",
			ExtraSample::AlphaAssoc => "ASSOCIATED ALPHA",
			ExtraSample::AlphaUnassoc => "UNASSOCIATED ALPHA",
		})
	}
}
