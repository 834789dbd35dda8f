//! Work-image TIFF output.
//!
//! The generation tools exchange intermediate rasters as plain single-strip
//! TIFF files (classic little-endian, one IFD). The whole raster is stored
//! as one strip, compressed with the requested codec; JPEG strips follow the
//! TIFF 6.0 new-style convention of one complete JFIF stream per strip.

use crate::codec;
use crate::traits::ImageNode;
use anyhow::{Context, Result, bail};
use rok4_core::format::{Compression, SampleFormat};
use rok4_core::io::ValueWriterBlob;
use rok4_core::types::Blob;
use std::path::Path;

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_EXTRA_SAMPLES: u16 = 338;
const TAG_SAMPLE_FORMAT: u16 = 339;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

struct IfdEntry {
	tag: u16,
	field_type: u16,
	count: u32,
	value: u32,
}

/// Reads all lines of `image` and writes them to `path` as a TIFF.
pub fn write_tiff(path: &Path, image: &dyn ImageNode, compression: Compression) -> Result<()> {
	let blob = to_tiff_blob(image, compression)?;
	std::fs::write(path, blob.as_slice()).with_context(|| format!("writing {path:?}"))
}

pub fn to_tiff_blob(image: &dyn ImageNode, compression: Compression) -> Result<Blob> {
	let meta = image.meta();
	let width = meta.width();
	let height = meta.height();
	let channels = meta.channels();
	let sample_format = meta.sample_format();

	let raw = read_raw_bytes(image)?;
	let strip = match compression {
		Compression::None => Blob::from(raw),
		Compression::Deflate => codec::deflate_encode(&raw)?,
		Compression::Lzw => codec::lzw_encode(&raw)?,
		Compression::Packbits => codec::packbits_encode(&raw),
		Compression::Jpeg => codec::jpeg_tile_encode(&raw, width, height, channels, 75, false)?,
		Compression::Png | Compression::Jpeg2000 => {
			bail!("{compression} is a slab tile compression, not a work image one")
		}
	};

	let photometric = match (channels, compression) {
		(1 | 2, _) => 1u32,
		(3, Compression::Jpeg) => 6,
		_ => 2,
	};
	let bits = u32::from(sample_format.bits_per_sample());
	let format_tag = if sample_format.is_float() { 3u32 } else { 1u32 };
	let has_alpha = channels == 2 || channels == 4;

	let mut entries = vec![
		IfdEntry {
			tag: TAG_IMAGE_WIDTH,
			field_type: TYPE_LONG,
			count: 1,
			value: width,
		},
		IfdEntry {
			tag: TAG_IMAGE_LENGTH,
			field_type: TYPE_LONG,
			count: 1,
			value: height,
		},
		IfdEntry {
			tag: TAG_BITS_PER_SAMPLE,
			field_type: TYPE_SHORT,
			count: u32::from(channels),
			value: 0, // patched below (inline or offset)
		},
		IfdEntry {
			tag: TAG_COMPRESSION,
			field_type: TYPE_SHORT,
			count: 1,
			value: u32::from(compression.tiff_tag()),
		},
		IfdEntry {
			tag: TAG_PHOTOMETRIC,
			field_type: TYPE_SHORT,
			count: 1,
			value: photometric,
		},
		IfdEntry {
			tag: TAG_STRIP_OFFSETS,
			field_type: TYPE_LONG,
			count: 1,
			value: 0, // patched below
		},
		IfdEntry {
			tag: TAG_SAMPLES_PER_PIXEL,
			field_type: TYPE_SHORT,
			count: 1,
			value: u32::from(channels),
		},
		IfdEntry {
			tag: TAG_ROWS_PER_STRIP,
			field_type: TYPE_LONG,
			count: 1,
			value: height,
		},
		IfdEntry {
			tag: TAG_STRIP_BYTE_COUNTS,
			field_type: TYPE_LONG,
			count: 1,
			value: strip.len() as u32,
		},
	];
	if has_alpha {
		entries.push(IfdEntry {
			tag: TAG_EXTRA_SAMPLES,
			field_type: TYPE_SHORT,
			count: 1,
			value: 2, // unassociated alpha
		});
	}
	entries.push(IfdEntry {
		tag: TAG_SAMPLE_FORMAT,
		field_type: TYPE_SHORT,
		count: u32::from(channels),
		value: 0, // patched below
	});

	// layout: header, IFD, external short arrays, strip
	let ifd_len = 2 + entries.len() as u32 * 12 + 4;
	let arrays_offset = 8 + ifd_len;
	let needs_arrays = channels > 2;
	let array_len = if needs_arrays { u32::from(channels) * 2 } else { 0 };
	let strip_offset = arrays_offset + 2 * array_len;

	for entry in &mut entries {
		match entry.tag {
			TAG_BITS_PER_SAMPLE => {
				entry.value = if needs_arrays { arrays_offset } else { inline_shorts(bits, channels) };
			}
			TAG_SAMPLE_FORMAT => {
				entry.value = if needs_arrays {
					arrays_offset + array_len
				} else {
					inline_shorts(format_tag, channels)
				};
			}
			TAG_STRIP_OFFSETS => entry.value = strip_offset,
			_ => {}
		}
	}

	let mut writer = ValueWriterBlob::new_le();
	writer.write_slice(b"II");
	writer.write_u16(42);
	writer.write_u32(8);

	writer.write_u16(entries.len() as u16);
	for entry in &entries {
		writer.write_u16(entry.tag);
		writer.write_u16(entry.field_type);
		writer.write_u32(entry.count);
		writer.write_u32(entry.value);
	}
	writer.write_u32(0);

	if needs_arrays {
		for _ in 0..channels {
			writer.write_u16(bits as u16);
		}
		for _ in 0..channels {
			writer.write_u16(format_tag as u16);
		}
	}

	writer.write_slice(strip.as_slice());
	Ok(writer.into_blob())
}

/// Packs up to two SHORT values into the 4-byte IFD value field.
fn inline_shorts(value: u32, count: u16) -> u32 {
	if count == 2 { value | (value << 16) } else { value }
}

fn read_raw_bytes(image: &dyn ImageNode) -> Result<Vec<u8>> {
	let meta = image.meta();
	let line_len = meta.line_len();
	let mut out = Vec::with_capacity(line_len * meta.height() as usize * meta.sample_format().bytes_per_sample());
	match meta.sample_format() {
		SampleFormat::Uint8 => {
			let mut line = vec![0u8; line_len];
			for y in 0..meta.height() {
				image.read_line_u8(y, &mut line)?;
				out.extend_from_slice(&line);
			}
		}
		SampleFormat::Uint16 => {
			let mut line = vec![0u16; line_len];
			for y in 0..meta.height() {
				image.read_line_u16(y, &mut line)?;
				for sample in &line {
					out.extend_from_slice(&sample.to_le_bytes());
				}
			}
		}
		SampleFormat::Float32 => {
			let mut line = vec![0f32; line_len];
			for y in 0..meta.height() {
				image.read_line_f32(y, &mut line)?;
				for sample in &line {
					out.extend_from_slice(&sample.to_le_bytes());
				}
			}
		}
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::empty::EmptyImage;
	use crate::file::FileImage;
	use crate::traits::ImageMeta;
	use rok4_core::crs::Crs;
	use rok4_core::types::BBox;
	use rstest::rstest;

	fn gray_gradient() -> impl ImageNode {
		struct Gradient(ImageMeta);
		impl ImageNode for Gradient {
			fn meta(&self) -> &ImageMeta {
				&self.0
			}
			fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
				for (x, sample) in buffer[..self.0.line_len()].iter_mut().enumerate() {
					*sample = (x as u32 * 7 + y * 13) as u8;
				}
				Ok(())
			}
		}
		Gradient(
			ImageMeta::new(
				16,
				16,
				1,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 16.0, 16.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
		)
	}

	#[rstest]
	#[case::raw(Compression::None)]
	#[case::zip(Compression::Deflate)]
	#[case::lzw(Compression::Lzw)]
	#[case::pkb(Compression::Packbits)]
	fn round_trips_through_our_own_decoder(#[case] compression: Compression) -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("work.tif");
		let source = gray_gradient();
		write_tiff(&path, &source, compression)?;

		let reread = FileImage::open(&path, *source.meta().bbox(), source.meta().crs().clone())?;
		assert_eq!(reread.meta().width(), 16);
		assert_eq!(reread.meta().channels(), 1);
		let mut expected = vec![0u8; 16];
		let mut got = vec![0u8; 16];
		for y in 0..16 {
			source.read_line_u8(y, &mut expected)?;
			reread.read_line_u8(y, &mut got)?;
			assert_eq!(expected, got, "line {y}");
		}
		Ok(())
	}

	#[test]
	fn float_raster_survives() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let path = dir.path().join("dem.tif");
		let meta = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Float32,
			BBox::new(0.0, 0.0, 4.0, 4.0).unwrap(),
			Crs::from_id("EPSG:2154"),
		)
		.unwrap();
		let source = EmptyImage::new(meta, vec![-99999.0]);
		write_tiff(&path, &source, Compression::Deflate)?;

		let reread = FileImage::open(&path, *source.meta().bbox(), source.meta().crs().clone())?;
		assert_eq!(reread.meta().sample_format(), SampleFormat::Float32);
		let mut line = vec![0f32; 4];
		reread.read_line_f32(0, &mut line)?;
		assert_eq!(line, vec![-99999.0; 4]);
		Ok(())
	}

	#[test]
	fn png_compression_is_refused_for_work_images() {
		let source = gray_gradient();
		assert!(to_tiff_blob(&source, Compression::Png).is_err());
	}
}
