//! An in-memory image node over one decoded slab tile, the leaf of every
//! stored-pyramid image graph.

use anyhow::{Result, ensure};
use rok4_core::format::SampleFormat;
use rok4_core::types::Blob;
use rok4_image::{ImageMeta, ImageNode};

enum Samples {
	U8(Vec<u8>),
	U16(Vec<u16>),
	F32(Vec<f32>),
}

pub struct TileImage {
	meta: ImageMeta,
	samples: Samples,
}

impl TileImage {
	/// Wraps raw little-endian tile bytes, as produced by
	/// [`SlabReader::get_raw_tile`](crate::SlabReader::get_raw_tile).
	pub fn from_raw(meta: ImageMeta, raw: Blob) -> Result<TileImage> {
		let expected = meta.line_len() * meta.height() as usize * meta.sample_format().bytes_per_sample();
		ensure!(
			raw.len() as usize == expected,
			"tile holds {} bytes, geometry needs {expected}",
			raw.len()
		);
		let data = raw.as_slice();
		let samples = match meta.sample_format() {
			SampleFormat::Uint8 => Samples::U8(data.to_vec()),
			SampleFormat::Uint16 => Samples::U16(
				data
					.chunks_exact(2)
					.map(|c| u16::from_le_bytes([c[0], c[1]]))
					.collect(),
			),
			SampleFormat::Float32 => Samples::F32(
				data
					.chunks_exact(4)
					.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
					.collect(),
			),
		};
		Ok(TileImage { meta, samples })
	}
}

impl ImageNode for TileImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		let len = self.meta.line_len();
		ensure!(y < self.meta.height(), "line {y} out of range");
		let start = y as usize * len;
		match &self.samples {
			Samples::U8(data) => buffer[..len].copy_from_slice(&data[start..start + len]),
			Samples::U16(data) => {
				for (out, sample) in buffer[..len].iter_mut().zip(&data[start..start + len]) {
					*out = (sample / 257) as u8;
				}
			}
			Samples::F32(data) => {
				for (out, sample) in buffer[..len].iter_mut().zip(&data[start..start + len]) {
					*out = (sample.clamp(0.0, 1.0) * 255.0).round() as u8;
				}
			}
		}
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		let len = self.meta.line_len();
		ensure!(y < self.meta.height(), "line {y} out of range");
		let start = y as usize * len;
		match &self.samples {
			Samples::F32(data) => buffer[..len].copy_from_slice(&data[start..start + len]),
			Samples::U8(data) => {
				for (out, sample) in buffer[..len].iter_mut().zip(&data[start..start + len]) {
					*out = f32::from(*sample) / 255.0;
				}
			}
			Samples::U16(data) => {
				for (out, sample) in buffer[..len].iter_mut().zip(&data[start..start + len]) {
					*out = f32::from(*sample) / 65535.0;
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::types::BBox;

	#[test]
	fn float_tile_preserves_values() {
		let meta = ImageMeta::new(
			2,
			2,
			1,
			SampleFormat::Float32,
			BBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
			Crs::from_id("EPSG:2154"),
		)
		.unwrap();
		let values = [1.5f32, -99999.0, 0.0, 2.25];
		let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
		let tile = TileImage::from_raw(meta, Blob::from(bytes)).unwrap();
		let mut line = vec![0f32; 2];
		tile.read_line_f32(0, &mut line).unwrap();
		assert_eq!(line, [1.5, -99999.0]);
	}

	#[test]
	fn size_mismatch_is_refused() {
		let meta = ImageMeta::new(
			2,
			2,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
			Crs::from_id("EPSG:2154"),
		)
		.unwrap();
		assert!(TileImage::from_raw(meta, Blob::from(vec![0u8; 3])).is_err());
	}
}
