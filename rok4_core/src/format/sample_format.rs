//! Sample storage formats supported by the pipeline.
//!
//! Decoders may additionally encounter packed 1/2/4-bit unsigned data; those
//! are expanded to 8 bits at read time, so the pipeline only ever sees the
//! three variants below.

use anyhow::{Result, bail};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
	Uint8,
	Uint16,
	Float32,
}

impl SampleFormat {
	/// Reassembles a format from the TIFF-style (format class, bit depth) pair.
	pub fn from_parts(is_float: bool, bits: u16) -> Result<SampleFormat> {
		Ok(match (is_float, bits) {
			(false, 1 | 2 | 4 | 8) => SampleFormat::Uint8,
			(false, 16) => SampleFormat::Uint16,
			(true, 32) => SampleFormat::Float32,
			_ => bail!("unsupported sample format: float={is_float} bits={bits}"),
		})
	}

	pub fn bits_per_sample(&self) -> u16 {
		match self {
			SampleFormat::Uint8 => 8,
			SampleFormat::Uint16 => 16,
			SampleFormat::Float32 => 32,
		}
	}

	pub fn bytes_per_sample(&self) -> usize {
		self.bits_per_sample() as usize / 8
	}

	pub fn is_float(&self) -> bool {
		matches!(self, SampleFormat::Float32)
	}

	/// Canonical per-sample nodata default: 255 for integers, -99999 for floats.
	pub fn default_nodata(&self) -> f64 {
		match self {
			SampleFormat::Uint8 => 255.0,
			SampleFormat::Uint16 => 65535.0,
			SampleFormat::Float32 => -99999.0,
		}
	}

	/// Largest representable sample value, used by multiplicative blending.
	pub fn max_value(&self) -> f64 {
		match self {
			SampleFormat::Uint8 => 255.0,
			SampleFormat::Uint16 => 65535.0,
			SampleFormat::Float32 => 1.0,
		}
	}
}

impl Display for SampleFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			SampleFormat::Uint8 => "UINT8",
			SampleFormat::Uint16 => "UINT16",
			SampleFormat::Float32 => "FLOAT32",
		})
	}
}

impl FromStr for SampleFormat {
	type Err = anyhow::Error;

	fn from_str(value: &str) -> Result<Self> {
		Ok(match value.to_uppercase().as_str() {
			"UINT8" | "INT8" => SampleFormat::Uint8,
			"UINT16" => SampleFormat::Uint16,
			"FLOAT32" | "FLOAT" => SampleFormat::Float32,
			_ => bail!("unknown sample format '{value}'"),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parts_round_trip() {
		assert_eq!(SampleFormat::from_parts(false, 8).unwrap(), SampleFormat::Uint8);
		assert_eq!(SampleFormat::from_parts(false, 1).unwrap(), SampleFormat::Uint8);
		assert_eq!(SampleFormat::from_parts(false, 16).unwrap(), SampleFormat::Uint16);
		assert_eq!(SampleFormat::from_parts(true, 32).unwrap(), SampleFormat::Float32);
		assert!(SampleFormat::from_parts(true, 8).is_err());
	}

	#[test]
	fn names() {
		for sf in [SampleFormat::Uint8, SampleFormat::Uint16, SampleFormat::Float32] {
			assert_eq!(sf.to_string().parse::<SampleFormat>().unwrap(), sf);
		}
		assert!("DOUBLE".parse::<SampleFormat>().is_err());
	}

	#[test]
	fn nodata_defaults() {
		assert_eq!(SampleFormat::Uint8.default_nodata(), 255.0);
		assert_eq!(SampleFormat::Float32.default_nodata(), -99999.0);
	}
}
