//! Slab writing: pull every tile rectangle out of an image node, compress
//! it, and assemble header + index + tiles.

use super::header::SlabHeader;
use anyhow::{Context, Result};
use rok4_core::format::{Compression, SampleFormat};
use rok4_core::io::ValueWriterBlob;
use rok4_core::storage::StorageContext;
use rok4_core::types::Blob;
use rok4_image::codec;
use rok4_image::ImageNode;

pub struct SlabWriter {
	tile_width: u32,
	tile_height: u32,
	compression: Compression,
	/// Whiten JPEG blocks touching pure white (nodata) pixels.
	crop: bool,
}

impl SlabWriter {
	pub fn new(tile_width: u32, tile_height: u32, compression: Compression, crop: bool) -> SlabWriter {
		SlabWriter {
			tile_width,
			tile_height,
			compression,
			crop,
		}
	}

	/// Walks the tiles of `image` in row-major order and writes the complete
	/// slab under `key`.
	pub fn write(&self, context: &dyn StorageContext, key: &str, image: &dyn ImageNode) -> Result<()> {
		let blob = self.to_blob(image)?;
		context
			.write(key, &blob)
			.with_context(|| format!("writing slab '{key}' to container '{}'", context.container()))
	}

	pub fn to_blob(&self, image: &dyn ImageNode) -> Result<Blob> {
		let meta = image.meta();
		let header = SlabHeader::new(
			meta.width(),
			meta.height(),
			meta.channels(),
			meta.sample_format(),
			self.compression,
			self.tile_width,
			self.tile_height,
		)?;

		let mut tiles: Vec<Blob> = Vec::with_capacity(header.tile_count() as usize);
		let mut band = RowBand::new(image);
		for tile_row in 0..header.tiles_high() {
			band.load(tile_row * self.tile_height, self.tile_height)?;
			for tile_col in 0..header.tiles_wide() {
				let raw = band.tile_bytes(tile_col * self.tile_width, self.tile_width);
				tiles.push(codec::encode_tile(
					self.compression,
					&raw,
					self.tile_width,
					self.tile_height,
					meta.channels(),
					self.crop,
				)?);
			}
		}

		let mut writer = ValueWriterBlob::new_le();
		writer.write_slice(header.to_blob()?.as_slice());
		let mut offset = header.data_offset() as u32;
		for tile in &tiles {
			writer.write_u32(offset);
			offset += tile.len() as u32;
		}
		for tile in &tiles {
			writer.write_u32(tile.len() as u32);
		}
		for tile in &tiles {
			writer.write_slice(tile.as_slice());
		}
		Ok(writer.into_blob())
	}
}

/// One tile row of source lines, as raw little-endian bytes.
struct RowBand<'a> {
	image: &'a dyn ImageNode,
	bytes_per_sample: usize,
	/// `height` lines of `width·channels` samples each.
	data: Vec<u8>,
	lines: u32,
}

impl<'a> RowBand<'a> {
	fn new(image: &'a dyn ImageNode) -> RowBand<'a> {
		RowBand {
			bytes_per_sample: image.meta().sample_format().bytes_per_sample(),
			image,
			data: Vec::new(),
			lines: 0,
		}
	}

	fn load(&mut self, first_line: u32, count: u32) -> Result<()> {
		let meta = self.image.meta();
		let line_len = meta.line_len();
		self.data.clear();
		self.data.reserve(line_len * count as usize * self.bytes_per_sample);
		match meta.sample_format() {
			SampleFormat::Uint8 => {
				let mut line = vec![0u8; line_len];
				for y in first_line..first_line + count {
					self.image.read_line_u8(y, &mut line)?;
					self.data.extend_from_slice(&line);
				}
			}
			SampleFormat::Uint16 => {
				let mut line = vec![0u16; line_len];
				for y in first_line..first_line + count {
					self.image.read_line_u16(y, &mut line)?;
					for sample in &line {
						self.data.extend_from_slice(&sample.to_le_bytes());
					}
				}
			}
			SampleFormat::Float32 => {
				let mut line = vec![0f32; line_len];
				for y in first_line..first_line + count {
					self.image.read_line_f32(y, &mut line)?;
					for sample in &line {
						self.data.extend_from_slice(&sample.to_le_bytes());
					}
				}
			}
		}
		self.lines = count;
		Ok(())
	}

	/// Raw bytes of the tile starting at `first_col`, row-major.
	fn tile_bytes(&self, first_col: u32, tile_width: u32) -> Vec<u8> {
		let meta = self.image.meta();
		let channels = meta.channels() as usize;
		let pixel_bytes = channels * self.bytes_per_sample;
		let line_bytes = meta.width() as usize * pixel_bytes;
		let mut out = Vec::with_capacity(tile_width as usize * self.lines as usize * pixel_bytes);
		for line in 0..self.lines as usize {
			let start = line * line_bytes + first_col as usize * pixel_bytes;
			out.extend_from_slice(&self.data[start..start + tile_width as usize * pixel_bytes]);
		}
		out
	}
}
