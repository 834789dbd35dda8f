//! Whole-image response encoders.
//!
//! The tile server encodes the root of an image graph into the MIME type the
//! client asked for. PNG carries 1–4 channel 8-bit data, JPEG gray or RGB,
//! TIFF everything including 32-bit floats (deflate-compressed).

use crate::codec;
use crate::file::to_tiff_blob;
use crate::traits::ImageNode;
use anyhow::{Result, bail};
use rok4_core::format::Compression;
use rok4_core::types::Blob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
	Png,
	Jpeg,
	Tiff,
}

impl OutputFormat {
	pub fn from_mime(mime: &str) -> Result<OutputFormat> {
		Ok(match mime {
			"image/png" => OutputFormat::Png,
			"image/jpeg" | "image/jpg" => OutputFormat::Jpeg,
			"image/tiff" | "image/geotiff" => OutputFormat::Tiff,
			_ => bail!("unsupported output format '{mime}'"),
		})
	}

	pub fn mime_type(&self) -> &'static str {
		match self {
			OutputFormat::Png => "image/png",
			OutputFormat::Jpeg => "image/jpeg",
			OutputFormat::Tiff => "image/tiff",
		}
	}
}

/// Pulls every line of `image` and encodes the raster as `format`.
pub fn encode_image(image: &dyn ImageNode, format: OutputFormat) -> Result<Blob> {
	let meta = image.meta();
	match format {
		OutputFormat::Tiff => to_tiff_blob(image, Compression::Deflate),
		OutputFormat::Png | OutputFormat::Jpeg => {
			let mut data = vec![0u8; meta.line_len() * meta.height() as usize];
			let line_len = meta.line_len();
			for y in 0..meta.height() {
				image.read_line_u8(y, &mut data[y as usize * line_len..(y as usize + 1) * line_len])?;
			}
			if format == OutputFormat::Png {
				codec::png_tile_encode(&data, meta.width(), meta.height(), meta.channels())
			} else {
				codec::jpeg_tile_encode(&data, meta.width(), meta.height(), meta.channels(), 75, false)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::empty::EmptyImage;
	use crate::traits::ImageMeta;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;

	fn gray(value: f32) -> EmptyImage {
		EmptyImage::new(
			ImageMeta::new(
				16,
				16,
				1,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 16.0, 16.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
			vec![value],
		)
	}

	#[test]
	fn png_starts_with_the_signature() {
		let blob = encode_image(&gray(7.0), OutputFormat::Png).unwrap();
		assert_eq!(&blob.as_slice()[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
	}

	#[test]
	fn jpeg_starts_with_the_marker() {
		let blob = encode_image(&gray(7.0), OutputFormat::Jpeg).unwrap();
		assert_eq!(&blob.as_slice()[..2], &[0xFF, 0xD8]);
	}

	#[test]
	fn mime_round_trip() {
		assert_eq!(OutputFormat::from_mime("image/png").unwrap().mime_type(), "image/png");
		assert_eq!(OutputFormat::from_mime("image/jpeg").unwrap().mime_type(), "image/jpeg");
		assert!(OutputFormat::from_mime("image/gif").is_err());
	}
}
