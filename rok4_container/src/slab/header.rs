//! The fixed 2048-byte slab header.
//!
//! Layout:
//! - bytes 0..8: classic little-endian TIFF header, IFD at offset 8
//! - bytes 8..: one IFD with the tile tags, then the external short arrays
//!   (`BitsPerSample` / `SampleFormat` values when more than two channels)
//! - zero padding up to 2048
//! - bytes 2048..2048+4·T: `TileOffsets`, 32 bits per tile
//! - bytes 2048+4·T..2048+8·T: `TileByteCounts`, 32 bits per tile
//! - tile data, row-major
//!
//! Both index arrays sit at offsets computable from the slab geometry, so
//! the serving path reads them directly without touching the IFD.

use anyhow::{Result, bail, ensure};
use byteorder::LittleEndian;
use rok4_core::format::{Compression, Photometric, SampleFormat};
use rok4_core::io::{ValueReaderSlice, ValueWriterBlob};
use rok4_core::types::{Blob, ByteRange};
use std::collections::HashMap;

pub const ROK4_HEADER_SIZE: u64 = 2048;

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_TILE_WIDTH: u16 = 322;
const TAG_TILE_LENGTH: u16 = 323;
const TAG_TILE_OFFSETS: u16 = 324;
const TAG_TILE_BYTE_COUNTS: u16 = 325;
const TAG_EXTRA_SAMPLES: u16 = 338;
const TAG_SAMPLE_FORMAT: u16 = 339;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabHeader {
	pub width: u32,
	pub height: u32,
	pub channels: u16,
	pub sample_format: SampleFormat,
	pub photometric: Photometric,
	pub compression: Compression,
	pub tile_width: u32,
	pub tile_height: u32,
}

impl SlabHeader {
	pub fn new(
		width: u32,
		height: u32,
		channels: u16,
		sample_format: SampleFormat,
		compression: Compression,
		tile_width: u32,
		tile_height: u32,
	) -> Result<SlabHeader> {
		ensure!(tile_width > 0 && tile_height > 0, "tile dimensions must be > 0");
		ensure!(
			width % tile_width == 0,
			"slab width ({width}) must be a multiple of the tile width ({tile_width})"
		);
		ensure!(
			height % tile_height == 0,
			"slab height ({height}) must be a multiple of the tile height ({tile_height})"
		);
		Ok(SlabHeader {
			width,
			height,
			channels,
			sample_format,
			photometric: Photometric::from_channels(channels)?,
			compression,
			tile_width,
			tile_height,
		})
	}

	pub fn tiles_wide(&self) -> u32 {
		self.width / self.tile_width
	}

	pub fn tiles_high(&self) -> u32 {
		self.height / self.tile_height
	}

	pub fn tile_count(&self) -> u32 {
		self.tiles_wide() * self.tiles_high()
	}

	/// Raw byte size of one decoded tile.
	pub fn raw_tile_size(&self) -> usize {
		self.tile_width as usize
			* self.tile_height as usize
			* self.channels as usize
			* self.sample_format.bytes_per_sample()
	}

	/// Where the `TileOffsets` array lives.
	pub fn offsets_range(&self) -> ByteRange {
		ByteRange::new(ROK4_HEADER_SIZE, u64::from(self.tile_count()) * 4)
	}

	/// Where the `TileByteCounts` array lives.
	pub fn byte_counts_range(&self) -> ByteRange {
		ByteRange::new(ROK4_HEADER_SIZE + u64::from(self.tile_count()) * 4, u64::from(self.tile_count()) * 4)
	}

	/// First byte of the tile data.
	pub fn data_offset(&self) -> u64 {
		ROK4_HEADER_SIZE + u64::from(self.tile_count()) * 8
	}

	/// Serializes the 2048-byte header region.
	pub fn to_blob(&self) -> Result<Blob> {
		let has_alpha = self.channels == 2 || self.channels == 4;
		let entry_count: u16 = if has_alpha { 12 } else { 11 };
		let ifd_end = 8 + 2 + u64::from(entry_count) * 12 + 4;
		// external arrays for BitsPerSample / SampleFormat when they do not
		// fit the 4-byte value field
		let needs_arrays = self.channels > 2;
		let arrays_offset = ifd_end;
		let array_len = u64::from(self.channels) * 2;

		let bits = u32::from(self.sample_format.bits_per_sample());
		let format_tag: u32 = if self.sample_format.is_float() { 3 } else { 1 };
		let index_offset = self.offsets_range().offset as u32;
		let counts_offset = self.byte_counts_range().offset as u32;

		let mut writer = ValueWriterBlob::new_le();
		writer.write_slice(b"II");
		writer.write_u16(42);
		writer.write_u32(8);

		fn write_entry(writer: &mut ValueWriterBlob<LittleEndian>, tag: u16, field_type: u16, count: u32, value: u32) {
			writer.write_u16(tag);
			writer.write_u16(field_type);
			writer.write_u32(count);
			writer.write_u32(value);
		}

		writer.write_u16(entry_count);
		write_entry(&mut writer, TAG_IMAGE_WIDTH, TYPE_LONG, 1, self.width);
		write_entry(&mut writer, TAG_IMAGE_LENGTH, TYPE_LONG, 1, self.height);
		write_entry(
			&mut writer,
			TAG_BITS_PER_SAMPLE,
			TYPE_SHORT,
			u32::from(self.channels),
			if needs_arrays {
				arrays_offset as u32
			} else {
				inline_shorts(bits, self.channels)
			},
		);
		write_entry(&mut writer, TAG_COMPRESSION, TYPE_SHORT, 1, u32::from(self.compression.tiff_tag()));
		write_entry(&mut writer, TAG_PHOTOMETRIC, TYPE_SHORT, 1, u32::from(self.photometric.tiff_tag()));
		write_entry(&mut writer, TAG_SAMPLES_PER_PIXEL, TYPE_SHORT, 1, u32::from(self.channels));
		write_entry(&mut writer, TAG_TILE_WIDTH, TYPE_LONG, 1, self.tile_width);
		write_entry(&mut writer, TAG_TILE_LENGTH, TYPE_LONG, 1, self.tile_height);
		write_entry(&mut writer, TAG_TILE_OFFSETS, TYPE_LONG, self.tile_count(), index_offset);
		write_entry(&mut writer, TAG_TILE_BYTE_COUNTS, TYPE_LONG, self.tile_count(), counts_offset);
		if has_alpha {
			write_entry(&mut writer, TAG_EXTRA_SAMPLES, TYPE_SHORT, 1, 2);
		}
		write_entry(
			&mut writer,
			TAG_SAMPLE_FORMAT,
			TYPE_SHORT,
			u32::from(self.channels),
			if needs_arrays {
				(arrays_offset + array_len) as u32
			} else {
				inline_shorts(format_tag, self.channels)
			},
		);
		writer.write_u32(0);

		if needs_arrays {
			for _ in 0..self.channels {
				writer.write_u16(bits as u16);
			}
			for _ in 0..self.channels {
				writer.write_u16(format_tag as u16);
			}
		}

		ensure!(
			writer.position() <= ROK4_HEADER_SIZE,
			"slab header overflows its {ROK4_HEADER_SIZE} bytes"
		);
		writer.pad_to(ROK4_HEADER_SIZE)?;
		Ok(writer.into_blob())
	}

	/// Parses the 2048-byte header region.
	pub fn from_blob(blob: &Blob) -> Result<SlabHeader> {
		ensure!(
			blob.len() >= ROK4_HEADER_SIZE,
			"slab header must be {ROK4_HEADER_SIZE} bytes, got {}",
			blob.len()
		);
		let data = blob.as_slice();
		let mut reader = ValueReaderSlice::new_le(data);
		let magic = reader.read_slice(2)?;
		if magic != b"II" || reader.read_u16()? != 42 {
			bail!("not a little-endian TIFF header");
		}
		let ifd_offset = reader.read_u32()?;
		reader.set_position(u64::from(ifd_offset))?;

		let entry_count = reader.read_u16()?;
		let mut tags: HashMap<u16, (u16, u32, u32)> = HashMap::new();
		for _ in 0..entry_count {
			let tag = reader.read_u16()?;
			let field_type = reader.read_u16()?;
			let count = reader.read_u32()?;
			let value = reader.read_u32()?;
			tags.insert(tag, (field_type, count, value));
		}

		let long = |tag: u16| -> Result<u32> {
			tags
				.get(&tag)
				.map(|(_, _, value)| *value)
				.ok_or_else(|| anyhow::anyhow!("missing TIFF tag {tag}"))
		};
		let channels = long(TAG_SAMPLES_PER_PIXEL)? as u16;

		// BitsPerSample and SampleFormat may be inline or external
		let short_value = |tag: u16| -> Result<u16> {
			let (_, count, value) = tags.get(&tag).copied().ok_or_else(|| anyhow::anyhow!("missing TIFF tag {tag}"))?;
			if count <= 2 {
				Ok((value & 0xFFFF) as u16)
			} else {
				let mut r = ValueReaderSlice::new_le(data);
				r.set_position(u64::from(value))?;
				r.read_u16()
			}
		};

		let bits = short_value(TAG_BITS_PER_SAMPLE)?;
		let is_float = short_value(TAG_SAMPLE_FORMAT)? == 3;
		let sample_format = SampleFormat::from_parts(is_float, bits)?;
		let compression = Compression::from_tiff_tag(long(TAG_COMPRESSION)? as u16)?;

		SlabHeader::new(
			long(TAG_IMAGE_WIDTH)?,
			long(TAG_IMAGE_LENGTH)?,
			channels,
			sample_format,
			compression,
			long(TAG_TILE_WIDTH)?,
			long(TAG_TILE_LENGTH)?,
		)
	}
}

/// Packs up to two SHORT values into the 4-byte IFD value field.
fn inline_shorts(value: u32, count: u16) -> u32 {
	if count == 2 { value | (value << 16) } else { value }
}
