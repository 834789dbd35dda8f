//! Per-tile codecs.
//!
//! These functions encode and decode the pixel rectangle of a single tile or
//! strip, independent of any container. DEFLATE is the zlib-wrapped TIFF
//! flavor, LZW the MSB-first TIFF flavor with early size switch, PACKBITS
//! the classic byte RLE. PNG tiles are complete standalone PNG datastreams
//! (signature + IHDR + IDAT + IEND); JPEG tiles are baseline JPEG with an
//! optional white-block crop pass applied before encoding.

use anyhow::{Context, Result, anyhow, bail, ensure};
use flate2::Compression as FlateLevel;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, load_from_memory_with_format};
use rok4_core::format::{Compression, SampleFormat};
use rok4_core::types::Blob;
use std::io::{Read, Write};

/// JPEG nodata bleeds into neighbouring pixels; the crop pass keeps pure
/// white nodata intact by whitening every JPEG block that touches it.
pub const JPEG_BLOCK_SIZE: usize = 16;

pub fn deflate_encode(data: &[u8]) -> Result<Blob> {
	let mut encoder = ZlibEncoder::new(Vec::new(), FlateLevel::default());
	encoder.write_all(data)?;
	Ok(Blob::from(encoder.finish()?))
}

pub fn deflate_decode(data: &[u8]) -> Result<Blob> {
	let mut decoder = ZlibDecoder::new(data);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).context("inflating tile")?;
	Ok(Blob::from(out))
}

pub fn lzw_encode(data: &[u8]) -> Result<Blob> {
	let compressed = weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
		.encode(data)
		.map_err(|e| anyhow!("lzw encoding failed: {e}"))?;
	Ok(Blob::from(compressed))
}

pub fn lzw_decode(data: &[u8]) -> Result<Blob> {
	let decompressed = weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
		.decode(data)
		.map_err(|e| anyhow!("lzw decoding failed: {e}"))?;
	Ok(Blob::from(decompressed))
}

/// PackBits RLE: literal runs up to 128 bytes, repeat runs up to 128 bytes.
pub fn packbits_encode(data: &[u8]) -> Blob {
	let mut out = Vec::new();
	let mut i = 0;
	while i < data.len() {
		// measure the repeat run starting here
		let mut run = 1;
		while i + run < data.len() && data[i + run] == data[i] && run < 128 {
			run += 1;
		}
		if run >= 2 {
			out.push((1i16 - run as i16) as u8);
			out.push(data[i]);
			i += run;
			continue;
		}
		// literal run until the next repeat of length >= 3
		let start = i;
		i += 1;
		while i < data.len() && i - start < 128 {
			let ahead = i + 2 < data.len() && data[i] == data[i + 1] && data[i] == data[i + 2];
			if ahead {
				break;
			}
			i += 1;
		}
		out.push((i - start - 1) as u8);
		out.extend_from_slice(&data[start..i]);
	}
	Blob::from(out)
}

pub fn packbits_decode(data: &[u8], expected_len: usize) -> Result<Blob> {
	let mut out = Vec::with_capacity(expected_len);
	let mut i = 0;
	while i < data.len() && out.len() < expected_len {
		let n = data[i] as i8;
		i += 1;
		if n >= 0 {
			let count = n as usize + 1;
			ensure!(i + count <= data.len(), "packbits literal run exceeds input");
			out.extend_from_slice(&data[i..i + count]);
			i += count;
		} else if n != -128 {
			let count = 1 - n as isize;
			ensure!(i < data.len(), "packbits repeat run exceeds input");
			out.extend(std::iter::repeat_n(data[i], count as usize));
			i += 1;
		}
	}
	ensure!(
		out.len() == expected_len,
		"packbits stream decoded to {} bytes instead of {expected_len}",
		out.len()
	);
	Ok(Blob::from(out))
}

fn color_type(channels: u16) -> Result<ExtendedColorType> {
	Ok(match channels {
		1 => ExtendedColorType::L8,
		2 => ExtendedColorType::La8,
		3 => ExtendedColorType::Rgb8,
		4 => ExtendedColorType::Rgba8,
		_ => bail!("no 8-bit color type for {channels} channels"),
	})
}

/// Encodes one tile as a complete PNG datastream.
pub fn png_tile_encode(data: &[u8], width: u32, height: u32, channels: u16) -> Result<Blob> {
	let mut out = Vec::new();
	PngEncoder::new(&mut out)
		.write_image(data, width, height, color_type(channels)?)
		.context("encoding PNG tile")?;
	Ok(Blob::from(out))
}

pub fn png_tile_decode(data: &[u8], width: u32, height: u32, channels: u16) -> Result<Blob> {
	let decoded = load_from_memory_with_format(data, ImageFormat::Png).context("decoding PNG tile")?;
	ensure!(
		decoded.width() == width && decoded.height() == height,
		"PNG tile is {}x{}, expected {width}x{height}",
		decoded.width(),
		decoded.height()
	);
	ensure!(
		decoded.color().channel_count() == channels as u8,
		"PNG tile has {} channels, expected {channels}",
		decoded.color().channel_count()
	);
	Ok(Blob::from(decoded.into_bytes()))
}

/// Encodes one tile as baseline JPEG. With `crop`, every 16×16 block that
/// touches a pure white pixel is filled white first, so nodata stays exact
/// through the lossy encoding.
pub fn jpeg_tile_encode(data: &[u8], width: u32, height: u32, channels: u16, quality: u8, crop: bool) -> Result<Blob> {
	ensure!(
		channels == 1 || channels == 3,
		"JPEG tiles support 1 or 3 channels, got {channels}"
	);
	let mut owned;
	let pixels = if crop {
		owned = data.to_vec();
		crop_white_blocks(&mut owned, width as usize, height as usize, channels as usize);
		owned.as_slice()
	} else {
		data
	};
	let mut out = Vec::new();
	JpegEncoder::new_with_quality(&mut out, quality)
		.write_image(pixels, width, height, color_type(channels)?)
		.context("encoding JPEG tile")?;
	Ok(Blob::from(out))
}

pub fn jpeg_tile_decode(data: &[u8], width: u32, height: u32, channels: u16) -> Result<Blob> {
	let decoded = load_from_memory_with_format(data, ImageFormat::Jpeg).context("decoding JPEG tile")?;
	ensure!(
		decoded.width() == width && decoded.height() == height,
		"JPEG tile is {}x{}, expected {width}x{height}",
		decoded.width(),
		decoded.height()
	);
	let raw = match channels {
		1 => decoded.into_luma8().into_raw(),
		3 => decoded.into_rgb8().into_raw(),
		_ => bail!("JPEG tiles support 1 or 3 channels, got {channels}"),
	};
	Ok(Blob::from(raw))
}

/// Whitens every `JPEG_BLOCK_SIZE`² block containing at least one pixel that
/// is pure white on all channels.
pub fn crop_white_blocks(data: &mut [u8], width: usize, height: usize, channels: usize) {
	for block_y in (0..height).step_by(JPEG_BLOCK_SIZE) {
		for block_x in (0..width).step_by(JPEG_BLOCK_SIZE) {
			let y_end = (block_y + JPEG_BLOCK_SIZE).min(height);
			let x_end = (block_x + JPEG_BLOCK_SIZE).min(width);
			let mut touches_white = false;
			'scan: for y in block_y..y_end {
				for x in block_x..x_end {
					let p = (y * width + x) * channels;
					if data[p..p + channels].iter().all(|&s| s == 255) {
						touches_white = true;
						break 'scan;
					}
				}
			}
			if touches_white {
				for y in block_y..y_end {
					let start = (y * width + block_x) * channels;
					let end = (y * width + x_end - 1) * channels + channels;
					data[start..end].fill(255);
				}
			}
		}
	}
}

/// Encodes one raw tile with `compression`.
pub fn encode_tile(
	compression: Compression,
	data: &[u8],
	width: u32,
	height: u32,
	channels: u16,
	crop: bool,
) -> Result<Blob> {
	Ok(match compression {
		Compression::None => Blob::from(data),
		Compression::Deflate => deflate_encode(data)?,
		Compression::Lzw => lzw_encode(data)?,
		Compression::Packbits => packbits_encode(data),
		Compression::Png => png_tile_encode(data, width, height, channels)?,
		Compression::Jpeg => jpeg_tile_encode(data, width, height, channels, 75, crop)?,
		Compression::Jpeg2000 => bail!("JPEG2000 tile encoding is not supported"),
	})
}

/// Decodes one tile back to raw samples. `sample_format` sizes the expected
/// output for the byte-oriented codecs.
pub fn decode_tile(
	compression: Compression,
	data: &[u8],
	width: u32,
	height: u32,
	channels: u16,
	sample_format: SampleFormat,
) -> Result<Blob> {
	let expected = width as usize * height as usize * channels as usize * sample_format.bytes_per_sample();
	let raw = match compression {
		Compression::None => Blob::from(data),
		Compression::Deflate => deflate_decode(data)?,
		Compression::Lzw => lzw_decode(data)?,
		Compression::Packbits => packbits_decode(data, expected)?,
		Compression::Png => png_tile_decode(data, width, height, channels)?,
		Compression::Jpeg => jpeg_tile_decode(data, width, height, channels)?,
		Compression::Jpeg2000 => bail!("JPEG2000 tile decoding is not supported"),
	};
	ensure!(
		raw.len() as usize == expected,
		"tile decoded to {} bytes instead of {expected}",
		raw.len()
	);
	Ok(raw)
}
