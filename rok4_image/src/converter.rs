//! Per-row channel-count conversion for 8-bit unsigned samples.
//!
//! Gray is extracted from color with the 709-style luma weights
//! `0.2125 R + 0.7154 G + 0.0721 B`. A missing alpha channel is synthesized
//! opaque (255); an unwanted alpha channel is dropped, except in the
//! color→gray reductions where it is carried through to the 2-channel form.

use anyhow::{Result, bail, ensure};
use rok4_core::format::SampleFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelConverter {
	in_channels: u16,
	out_channels: u16,
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
	(0.2125 * f32::from(r) + 0.7154 * f32::from(g) + 0.0721 * f32::from(b)).round() as u8
}

impl PixelConverter {
	/// Builds a converter, or explains why the conversion is impossible.
	/// Identity conversions are refused too: a converter that does nothing
	/// hides a wiring mistake in the caller.
	pub fn new(sample_format: SampleFormat, in_channels: u16, out_channels: u16) -> Result<PixelConverter> {
		ensure!(
			sample_format == SampleFormat::Uint8,
			"pixel converter only handles 8-bit unsigned samples, got {sample_format}"
		);
		ensure!(
			(1..=4).contains(&in_channels) && (1..=4).contains(&out_channels),
			"channel counts must be in 1..=4 ({in_channels} -> {out_channels})"
		);
		if in_channels == out_channels {
			bail!("pixel converter must not be used for identical layouts ({in_channels} channels)");
		}
		Ok(PixelConverter {
			in_channels,
			out_channels,
		})
	}

	pub fn in_channels(&self) -> u16 {
		self.in_channels
	}

	pub fn out_channels(&self) -> u16 {
		self.out_channels
	}

	/// Converts one row of `width` pixels. `src` holds `width·in_channels`
	/// samples, `dst` receives `width·out_channels`.
	pub fn convert_line(&self, width: usize, src: &[u8], dst: &mut [u8]) {
		debug_assert!(src.len() >= width * self.in_channels as usize);
		debug_assert!(dst.len() >= width * self.out_channels as usize);

		match (self.in_channels, self.out_channels) {
			(1, 2) => {
				for i in 0..width {
					dst[2 * i] = src[i];
					dst[2 * i + 1] = 255;
				}
			}
			(1, 3) => {
				for i in 0..width {
					dst[3 * i..3 * i + 3].fill(src[i]);
				}
			}
			(1, 4) => {
				for i in 0..width {
					dst[4 * i..4 * i + 3].fill(src[i]);
					dst[4 * i + 3] = 255;
				}
			}
			(2, 1) => {
				for i in 0..width {
					dst[i] = src[2 * i];
				}
			}
			(2, 3) => {
				for i in 0..width {
					dst[3 * i..3 * i + 3].fill(src[2 * i]);
				}
			}
			(2, 4) => {
				for i in 0..width {
					dst[4 * i..4 * i + 3].fill(src[2 * i]);
					dst[4 * i + 3] = src[2 * i + 1];
				}
			}
			(3, 1) => {
				for i in 0..width {
					dst[i] = luma(src[3 * i], src[3 * i + 1], src[3 * i + 2]);
				}
			}
			(3, 2) => {
				for i in 0..width {
					dst[2 * i] = luma(src[3 * i], src[3 * i + 1], src[3 * i + 2]);
					dst[2 * i + 1] = 255;
				}
			}
			(3, 4) => {
				for i in 0..width {
					dst[4 * i..4 * i + 3].copy_from_slice(&src[3 * i..3 * i + 3]);
					dst[4 * i + 3] = 255;
				}
			}
			(4, 1) => {
				for i in 0..width {
					dst[i] = luma(src[4 * i], src[4 * i + 1], src[4 * i + 2]);
				}
			}
			(4, 2) => {
				for i in 0..width {
					dst[2 * i] = luma(src[4 * i], src[4 * i + 1], src[4 * i + 2]);
					dst[2 * i + 1] = src[4 * i + 3];
				}
			}
			(4, 3) => {
				for i in 0..width {
					dst[3 * i..3 * i + 3].copy_from_slice(&src[4 * i..4 * i + 3]);
				}
			}
			_ => unreachable!("identity layouts are refused at construction"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[test]
	fn refusals() {
		assert!(PixelConverter::new(SampleFormat::Float32, 1, 3).is_err());
		assert!(PixelConverter::new(SampleFormat::Uint16, 1, 3).is_err());
		assert!(PixelConverter::new(SampleFormat::Uint8, 3, 3).is_err());
		assert!(PixelConverter::new(SampleFormat::Uint8, 0, 3).is_err());
	}

	fn convert(in_c: u16, out_c: u16, src: &[u8]) -> Vec<u8> {
		let converter = PixelConverter::new(SampleFormat::Uint8, in_c, out_c).unwrap();
		let width = src.len() / in_c as usize;
		let mut dst = vec![0u8; width * out_c as usize];
		converter.convert_line(width, src, &mut dst);
		dst
	}

	#[rstest]
	#[case::gray_to_graya(1, 2, vec![10, 20], vec![10, 255, 20, 255])]
	#[case::gray_to_rgb(1, 3, vec![10], vec![10, 10, 10])]
	#[case::gray_to_rgba(1, 4, vec![10], vec![10, 10, 10, 255])]
	#[case::graya_drops_alpha(2, 1, vec![10, 99], vec![10])]
	#[case::graya_to_rgba(2, 4, vec![10, 99], vec![10, 10, 10, 99])]
	#[case::rgb_to_rgba(3, 4, vec![1, 2, 3], vec![1, 2, 3, 255])]
	#[case::rgba_to_rgb(4, 3, vec![1, 2, 3, 99], vec![1, 2, 3])]
	#[case::rgba_to_graya(4, 2, vec![100, 100, 100, 99], vec![100, 99])]
	fn matrix(#[case] in_c: u16, #[case] out_c: u16, #[case] src: Vec<u8>, #[case] expected: Vec<u8>) {
		assert_eq!(convert(in_c, out_c, &src), expected);
	}

	#[test]
	fn luma_weights() {
		// pure channels weigh 0.2125 / 0.7154 / 0.0721
		assert_eq!(convert(3, 1, &[255, 0, 0]), vec![54]);
		assert_eq!(convert(3, 1, &[0, 255, 0]), vec![182]);
		assert_eq!(convert(3, 1, &[0, 0, 255]), vec![18]);
		assert_eq!(convert(3, 1, &[255, 255, 255]), vec![255]);
	}

	#[test]
	fn lossless_paths_invert() {
		// 1 -> 2 -> 1 and 3 -> 4 -> 3 restore the original row
		let gray = vec![7u8, 42, 255];
		assert_eq!(convert(2, 1, &convert(1, 2, &gray)), gray);
		let rgb = vec![1u8, 2, 3, 4, 5, 6];
		assert_eq!(convert(4, 3, &convert(3, 4, &rgb)), rgb);
	}

	#[test]
	fn lossy_paths_are_idempotent() {
		// gray extraction of an already-gray triplet is stable
		let rgb = convert(1, 3, &[77u8, 128]);
		let gray = convert(3, 1, &rgb);
		assert_eq!(convert(3, 1, &convert(1, 3, &gray)), gray);
	}
}
