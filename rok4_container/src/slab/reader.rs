//! Slab reading with tile memoization.
//!
//! The header and the tile index are loaded once when the reader opens;
//! individual tiles are then fetched with ranged reads. Decoded tiles go
//! through a direct-mapped cache of `memory_size` entries (slot = tile
//! index modulo the size), which makes the adjacent-tile reads of slab
//! assembly cheap without a full LRU.

use super::header::{SlabHeader, ROK4_HEADER_SIZE};
use anyhow::{Result, bail, ensure};
use rok4_core::io::ValueReaderSlice;
use rok4_core::storage::StorageContext;
use rok4_core::types::{Blob, ByteRange};
use std::sync::{Arc, Mutex};

/// Decoded tiles memorized per open reader.
pub const DEFAULT_MEMORY_SIZE: usize = 16;

pub struct SlabReader {
	header: SlabHeader,
	context: Arc<dyn StorageContext>,
	key: String,
	offsets: Vec<u32>,
	byte_counts: Vec<u32>,
	memo: Mutex<Vec<Option<(u32, Vec<u8>)>>>,
}

impl SlabReader {
	/// Opens a slab: reads the fixed header and the tile index.
	pub fn open(context: Arc<dyn StorageContext>, key: &str, memory_size: usize) -> Result<SlabReader> {
		ensure!(memory_size > 0, "memory size must be > 0");
		let header_blob = context.read_range(key, &ByteRange::new(0, ROK4_HEADER_SIZE))?;
		let header = SlabHeader::from_blob(&header_blob)?;

		let index_blob = context.read_range(
			key,
			&ByteRange::new(ROK4_HEADER_SIZE, u64::from(header.tile_count()) * 8),
		)?;
		let mut reader = ValueReaderSlice::new_le(index_blob.as_slice());
		let mut offsets = Vec::with_capacity(header.tile_count() as usize);
		for _ in 0..header.tile_count() {
			offsets.push(reader.read_u32()?);
		}
		let mut byte_counts = Vec::with_capacity(header.tile_count() as usize);
		for _ in 0..header.tile_count() {
			byte_counts.push(reader.read_u32()?);
		}

		Ok(SlabReader {
			header,
			context,
			key: key.to_string(),
			offsets,
			byte_counts,
			memo: Mutex::new(vec![None; memory_size]),
		})
	}

	pub fn header(&self) -> &SlabHeader {
		&self.header
	}

	/// Tile index of `(col, row)` inside the slab.
	pub fn tile_index(&self, col: u32, row: u32) -> Result<u32> {
		ensure!(
			col < self.header.tiles_wide() && row < self.header.tiles_high(),
			"tile ({col}, {row}) outside the slab ({}x{} tiles)",
			self.header.tiles_wide(),
			self.header.tiles_high()
		);
		Ok(row * self.header.tiles_wide() + col)
	}

	/// Compressed bytes of one tile, verbatim. This is the zero-transform
	/// path used when the stored format matches the requested one.
	pub fn get_encoded_tile(&self, index: u32) -> Result<Blob> {
		ensure!(index < self.header.tile_count(), "tile index {index} out of range");
		let length = self.byte_counts[index as usize];
		if length == 0 {
			bail!("tile {index} of slab '{}' is empty", self.key);
		}
		let blob = self
			.context
			.read_range(&self.key, &ByteRange::new(u64::from(self.offsets[index as usize]), u64::from(length)))?;
		if blob.len() != u64::from(length) {
			bail!(
				"tile {index} of slab '{}' is truncated: {} bytes instead of {length}",
				self.key,
				blob.len()
			);
		}
		Ok(blob)
	}

	/// Decodes one tile into `buffer` (`raw_tile_size()` bytes), through the
	/// memoization cache.
	pub fn get_raw_tile(&self, index: u32, buffer: &mut [u8]) -> Result<()> {
		let expected = self.header.raw_tile_size();
		ensure!(
			buffer.len() >= expected,
			"tile buffer too small: {} < {expected}",
			buffer.len()
		);

		let mut memo = self.memo.lock().unwrap();
		let slot = index as usize % memo.len();
		if let Some((cached_index, data)) = &memo[slot] {
			if *cached_index == index {
				buffer[..expected].copy_from_slice(data);
				return Ok(());
			}
		}

		let encoded = self.get_encoded_tile(index)?;
		let raw = rok4_image::codec::decode_tile(
			self.header.compression,
			encoded.as_slice(),
			self.header.tile_width,
			self.header.tile_height,
			self.header.channels,
			self.header.sample_format,
		)?;
		buffer[..expected].copy_from_slice(raw.as_slice());
		memo[slot] = Some((index, raw.into_vec()));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::super::writer::SlabWriter;
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::format::{Compression, SampleFormat};
	use rok4_core::storage::MemoryContext;
	use rok4_core::types::BBox;
	use rok4_image::{ImageMeta, ImageNode};
	use rstest::rstest;

	struct Gradient(ImageMeta);
	impl ImageNode for Gradient {
		fn meta(&self) -> &ImageMeta {
			&self.0
		}
		fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
			for (i, s) in buffer[..self.0.line_len()].iter_mut().enumerate() {
				*s = (i as u32 + 3 * y) as u8;
			}
			Ok(())
		}
	}

	fn gradient(size: u32, channels: u16) -> Gradient {
		Gradient(
			ImageMeta::new(
				size,
				size,
				channels,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, f64::from(size), f64::from(size)).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
		)
	}

	fn write_and_open(compression: Compression) -> (Arc<MemoryContext>, SlabReader) {
		let context = Arc::new(MemoryContext::new("pool"));
		let writer = SlabWriter::new(16, 16, compression, false);
		writer.write(context.as_ref(), "slab.tif", &gradient(64, 3)).unwrap();
		let reader = SlabReader::open(context.clone(), "slab.tif", 4).unwrap();
		(context, reader)
	}

	#[rstest]
	#[case::raw(Compression::None)]
	#[case::zip(Compression::Deflate)]
	#[case::lzw(Compression::Lzw)]
	#[case::pkb(Compression::Packbits)]
	#[case::png(Compression::Png)]
	fn tile_round_trip(#[case] compression: Compression) {
		let (_context, reader) = write_and_open(compression);
		assert_eq!(reader.header().tile_count(), 16);

		let source = gradient(64, 3);
		let mut expected_line = vec![0u8; source.0.line_len()];
		let mut tile = vec![0u8; reader.header().raw_tile_size()];

		// tile (1, 2) starts at pixel (16, 32)
		let index = reader.tile_index(1, 2).unwrap();
		reader.get_raw_tile(index, &mut tile).unwrap();
		source.read_line_u8(32, &mut expected_line).unwrap();
		assert_eq!(&tile[..48], &expected_line[48..96]);
	}

	#[test]
	fn encoded_tile_is_verbatim() {
		let (context, reader) = write_and_open(Compression::Png);
		let index = reader.tile_index(0, 0).unwrap();
		let encoded = reader.get_encoded_tile(index).unwrap();
		// a full PNG datastream, signature included
		assert_eq!(&encoded.as_slice()[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

		// and it sits exactly where the index says inside the stored blob
		let stored = context.read("slab.tif").unwrap();
		let start = ROK4_HEADER_SIZE as usize + 16 * 8;
		assert_eq!(&stored.as_slice()[start..start + encoded.len() as usize], encoded.as_slice());
	}

	#[test]
	fn memoization_returns_identical_tiles() {
		let (_context, reader) = write_and_open(Compression::Deflate);
		let mut first = vec![0u8; reader.header().raw_tile_size()];
		let mut second = vec![0u8; reader.header().raw_tile_size()];
		reader.get_raw_tile(5, &mut first).unwrap();
		reader.get_raw_tile(5, &mut second).unwrap();
		assert_eq!(first, second);
		// a colliding slot (5 % 4 == 9 % 4) evicts and still decodes right
		reader.get_raw_tile(9, &mut second).unwrap();
		reader.get_raw_tile(5, &mut second).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn missing_slab_fails_to_open() {
		let context: Arc<dyn StorageContext> = Arc::new(MemoryContext::new("pool"));
		assert!(SlabReader::open(context, "absent.tif", 4).is_err());
	}

	#[test]
	fn truncated_tile_is_detected() {
		let context = Arc::new(MemoryContext::new("pool"));
		let writer = SlabWriter::new(16, 16, Compression::Deflate, false);
		writer.write(context.as_ref(), "slab.tif", &gradient(32, 1)).unwrap();

		// cut the blob short of the last tile
		let stored = context.read("slab.tif").unwrap();
		let truncated = Blob::from(&stored.as_slice()[..stored.len() as usize - 10]);
		context.write("slab.tif", &truncated).unwrap();

		let reader = SlabReader::open(context, "slab.tif", 4).unwrap();
		let last = reader.header().tile_count() - 1;
		assert!(reader.get_encoded_tile(last).is_err());
	}
}
