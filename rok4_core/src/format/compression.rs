//! Tile compressions carried by ROK4 slabs.
//!
//! `Png` is not a TIFF-native scanline compression: each tile is a complete
//! standalone PNG datastream. Readers recognize it through the project
//! specific TIFF compression tag value 34933.

use anyhow::{Result, bail};
use std::fmt::Display;
use std::str::FromStr;

/// TIFF compression tag value marking PNG-in-TIFF tiles.
pub const TIFF_COMPRESSION_PNG: u16 = 34933;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
	None,
	Deflate,
	Jpeg,
	Png,
	Lzw,
	Packbits,
	Jpeg2000,
}

impl Compression {
	/// TIFF tag value (`Compression`).
	pub fn tiff_tag(&self) -> u16 {
		match self {
			Compression::None => 1,
			Compression::Lzw => 5,
			Compression::Jpeg => 7,
			Compression::Deflate => 8,
			Compression::Packbits => 32773,
			Compression::Png => TIFF_COMPRESSION_PNG,
			Compression::Jpeg2000 => 33005,
		}
	}

	pub fn from_tiff_tag(tag: u16) -> Result<Compression> {
		Ok(match tag {
			1 => Compression::None,
			5 => Compression::Lzw,
			7 => Compression::Jpeg,
			8 | 32946 => Compression::Deflate,
			32773 => Compression::Packbits,
			TIFF_COMPRESSION_PNG => Compression::Png,
			33005 => Compression::Jpeg2000,
			_ => bail!("unknown TIFF compression tag {tag}"),
		})
	}

	/// Command-line token, as accepted by the generation tools (`-c`).
	pub fn from_tool_token(token: &str) -> Result<Compression> {
		Ok(match token {
			"raw" | "none" => Compression::None,
			"zip" => Compression::Deflate,
			"jpg" | "jpg90" => Compression::Jpeg,
			"png" => Compression::Png,
			"lzw" => Compression::Lzw,
			"pkb" => Compression::Packbits,
			_ => bail!("unknown compression '{token}'"),
		})
	}
}

impl Display for Compression {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Compression::None => "RAW",
			Compression::Deflate => "ZIP",
			Compression::Jpeg => "JPG",
			Compression::Png => "PNG",
			Compression::Lzw => "LZW",
			Compression::Packbits => "PKB",
			Compression::Jpeg2000 => "JP2",
		})
	}
}

impl FromStr for Compression {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.to_uppercase().as_str() {
			"RAW" | "NONE" => Compression::None,
			"ZIP" | "DEFLATE" => Compression::Deflate,
			"JPG" | "JPEG" => Compression::Jpeg,
			"PNG" => Compression::Png,
			"LZW" => Compression::Lzw,
			"PKB" | "PACKBITS" => Compression::Packbits,
			"JP2" | "JPEG2000" => Compression::Jpeg2000,
			_ => bail!("unknown compression '{value}'"),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tiff_tags_round_trip() {
		for c in [
			Compression::None,
			Compression::Deflate,
			Compression::Jpeg,
			Compression::Png,
			Compression::Lzw,
			Compression::Packbits,
		] {
			assert_eq!(Compression::from_tiff_tag(c.tiff_tag()).unwrap(), c);
		}
		assert!(Compression::from_tiff_tag(999).is_err());
	}

	#[test]
	fn png_tag_is_the_rok4_extension_value() {
		assert_eq!(Compression::Png.tiff_tag(), 34933);
	}

	#[test]
	fn tool_tokens() {
		assert_eq!(Compression::from_tool_token("raw").unwrap(), Compression::None);
		assert_eq!(Compression::from_tool_token("zip").unwrap(), Compression::Deflate);
		assert_eq!(Compression::from_tool_token("jpg90").unwrap(), Compression::Jpeg);
		assert!(Compression::from_tool_token("bzip2").is_err());
	}
}
