//! Photometric interpretation of the color samples.

use anyhow::{Result, bail};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Photometric {
	Gray,
	Rgb,
	Ycbcr,
	Mask,
}

impl Photometric {
	/// Derives the interpretation from a channel count: 1 and 2 are gray
	/// (with alpha), 3 and 4 are RGB (with alpha).
	pub fn from_channels(channels: u16) -> Result<Photometric> {
		Ok(match channels {
			1 | 2 => Photometric::Gray,
			3 | 4 => Photometric::Rgb,
			_ => bail!("channel count must be in 1..=4, got {channels}"),
		})
	}

	/// TIFF tag value (`PhotometricInterpretation`).
	pub fn tiff_tag(&self) -> u16 {
		match self {
			Photometric::Gray | Photometric::Mask => 1,
			Photometric::Rgb => 2,
			Photometric::Ycbcr => 6,
		}
	}
}

impl Display for Photometric {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Photometric::Gray => "GRAY",
			Photometric::Rgb => "RGB",
			Photometric::Ycbcr => "YCBCR",
			Photometric::Mask => "MASK",
		})
	}
}

impl FromStr for Photometric {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.to_uppercase().as_str() {
			"GRAY" | "GREY" => Photometric::Gray,
			"RGB" => Photometric::Rgb,
			"YCBCR" => Photometric::Ycbcr,
			"MASK" => Photometric::Mask,
			_ => bail!("unknown photometric '{value}'"),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn from_channels() {
		assert_eq!(Photometric::from_channels(1).unwrap(), Photometric::Gray);
		assert_eq!(Photometric::from_channels(2).unwrap(), Photometric::Gray);
		assert_eq!(Photometric::from_channels(3).unwrap(), Photometric::Rgb);
		assert_eq!(Photometric::from_channels(4).unwrap(), Photometric::Rgb);
		assert!(Photometric::from_channels(5).is_err());
	}
}
