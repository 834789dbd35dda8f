//! Decoder-backed image nodes and the work-image TIFF writer.
//!
//! [`FileImage::open`] selects the decoder from the filename extension:
//! `.tif`/`.tiff`, `.png`, `.jpg`/`.jpeg`, `.bil`/`.zbil`. JPEG2000 is
//! recognized but not decodable with this stack and is refused. The whole
//! raster is decoded on open; `read_line_*` then serves rows from memory,
//! applying the attached pixel converter when the caller asked for a
//! different channel layout.

mod bil;
mod decode;
mod jpeg;
mod png;
mod tiff_file;
mod tiff_writer;

pub use decode::{Decoded, SampleBuffer};
pub use png::from_dynamic;
pub use tiff_writer::{to_tiff_blob, write_tiff};

use crate::converter::PixelConverter;
use crate::samples;
use crate::traits::{ImageMeta, ImageNode, check_line};
use anyhow::{Result, bail, ensure};
use rok4_core::crs::Crs;
use rok4_core::format::SampleFormat;
use rok4_core::types::BBox;
use std::path::Path;

/// Image node backed by a decoded raster file.
#[derive(Debug)]
pub struct FileImage {
	meta: ImageMeta,
	native_channels: u16,
	buffer: SampleBuffer,
	converter: Option<PixelConverter>,
}

impl FileImage {
	/// Opens and fully decodes `path`, georeferencing it with `bbox`/`crs`.
	pub fn open(path: &Path, bbox: BBox, crs: Crs) -> Result<FileImage> {
		let extension = path
			.extension()
			.and_then(|e| e.to_str())
			.map(str::to_lowercase)
			.unwrap_or_default();
		let decoded = match extension.as_str() {
			"tif" | "tiff" => tiff_file::decode(path)?,
			"png" => png::decode(path)?,
			"jpg" | "jpeg" => jpeg::decode(path)?,
			"bil" | "zbil" => bail!("BIL images need explicit dimensions, use FileImage::open_bil"),
			"jp2" => bail!("JPEG2000 decoding is not supported"),
			other => bail!("no decoder for extension '{other}' ({path:?})"),
		};
		Self::from_decoded(decoded, bbox, crs)
	}

	/// Opens a headerless BIL (or zlib-wrapped zBIL) raster whose geometry
	/// must be supplied by the caller.
	pub fn open_bil(
		path: &Path,
		width: u32,
		height: u32,
		channels: u16,
		sample_format: SampleFormat,
		bbox: BBox,
		crs: Crs,
	) -> Result<FileImage> {
		let decoded = bil::decode(path, width, height, channels, sample_format)?;
		Self::from_decoded(decoded, bbox, crs)
	}

	fn from_decoded(mut decoded: Decoded, bbox: BBox, crs: Crs) -> Result<FileImage> {
		decoded.unassociate_alpha();
		let meta = ImageMeta::new(
			decoded.width,
			decoded.height,
			decoded.channels,
			decoded.buffer.sample_format(),
			bbox,
			crs,
		)?;
		Ok(FileImage {
			native_channels: decoded.channels,
			meta,
			buffer: decoded.buffer,
			converter: None,
		})
	}

	/// Verifies the decoded raster against caller-declared resolutions.
	pub fn check_geometry(&self, res_x: f64, res_y: f64) -> Result<()> {
		let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * a.abs().max(b.abs());
		ensure!(
			close(self.meta.res_x(), res_x) && close(self.meta.res_y(), res_y),
			"raster geometry mismatch: file is {}x{} over {:?} but declared resolutions are {res_x} x {res_y}",
			self.meta.width(),
			self.meta.height(),
			self.meta.bbox()
		);
		Ok(())
	}

	/// Requests a different channel layout on output; attaches the pixel
	/// converter or fails when the conversion is impossible.
	pub fn convert_to_channels(&mut self, out_channels: u16) -> Result<()> {
		if out_channels == self.native_channels {
			self.converter = None;
			return Ok(());
		}
		let converter = PixelConverter::new(self.buffer.sample_format(), self.native_channels, out_channels)?;
		self.meta = ImageMeta::new(
			self.meta.width(),
			self.meta.height(),
			out_channels,
			self.meta.sample_format(),
			*self.meta.bbox(),
			self.meta.crs().clone(),
		)?;
		self.converter = Some(converter);
		Ok(())
	}

	fn native_line_len(&self) -> usize {
		self.meta.width() as usize * self.native_channels as usize
	}
}

impl ImageNode for FileImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let len = self.native_line_len();
		let start = y as usize * len;
		match (&self.buffer, &self.converter) {
			(SampleBuffer::U8(data), None) => buffer[..len].copy_from_slice(&data[start..start + len]),
			(SampleBuffer::U8(data), Some(converter)) => {
				converter.convert_line(self.meta.width() as usize, &data[start..start + len], buffer);
			}
			(SampleBuffer::U16(data), None) => samples::u16_to_u8(&data[start..start + len], buffer),
			(SampleBuffer::F32(data), None) => samples::f32_to_u8(&data[start..start + len], buffer),
			_ => bail!("pixel converter is only valid on 8-bit rasters"),
		}
		Ok(())
	}

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let len = self.native_line_len();
		let start = y as usize * len;
		match (&self.buffer, &self.converter) {
			(SampleBuffer::U16(data), None) => buffer[..len].copy_from_slice(&data[start..start + len]),
			(SampleBuffer::U8(data), None) => samples::u8_to_u16(&data[start..start + len], buffer),
			(SampleBuffer::U8(data), Some(converter)) => {
				let mut tmp = vec![0u8; self.meta.line_len()];
				converter.convert_line(self.meta.width() as usize, &data[start..start + len], &mut tmp);
				samples::u8_to_u16(&tmp, buffer);
			}
			(SampleBuffer::F32(data), None) => samples::f32_to_u16(&data[start..start + len], buffer),
			_ => bail!("pixel converter is only valid on 8-bit rasters"),
		}
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let len = self.native_line_len();
		let start = y as usize * len;
		match (&self.buffer, &self.converter) {
			(SampleBuffer::F32(data), None) => buffer[..len].copy_from_slice(&data[start..start + len]),
			(SampleBuffer::U8(data), None) => samples::u8_to_f32(&data[start..start + len], buffer),
			(SampleBuffer::U8(data), Some(converter)) => {
				let mut tmp = vec![0u8; self.meta.line_len()];
				converter.convert_line(self.meta.width() as usize, &data[start..start + len], &mut tmp);
				samples::u8_to_f32(&tmp, buffer);
			}
			(SampleBuffer::U16(data), None) => samples::u16_to_f32(&data[start..start + len], buffer),
			_ => bail!("pixel converter is only valid on 8-bit rasters"),
		}
		Ok(())
	}
}
