//! Integer-factor decimation: every k-th pixel of the source, no filtering.
//! A source mask decimates along, so overlays can still defer to lower
//! layers where the source had no data.

use crate::traits::{ImageMeta, ImageNode, MaskAdapter, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::format::SampleFormat;
use std::sync::Arc;

pub struct DecimatedImage {
	meta: ImageMeta,
	source: SharedImage,
	factor: u32,
	/// Source pixel of the first output pixel.
	first_col: u32,
	first_row: u32,
	mask: Option<Box<DecimatedImage>>,
}

impl DecimatedImage {
	/// Decimates `source` onto `meta`. The target resolution must be an
	/// integer multiple of the source's and every target pixel center must
	/// sit on a source pixel center.
	pub fn new(source: SharedImage, meta: ImageMeta) -> Result<DecimatedImage> {
		let src = source.meta();
		ensure!(
			src.crs().id() == meta.crs().id(),
			"decimation works within one CRS ({} vs {})",
			src.crs(),
			meta.crs()
		);
		ensure!(
			src.channels() == meta.channels(),
			"decimation does not change the channel count"
		);

		let ratio = meta.res_x() / src.res_x();
		let factor = ratio.round();
		ensure!(
			factor >= 1.0 && (ratio - factor).abs() < 1e-6 && (meta.res_y() / src.res_y() - factor).abs() < 1e-6,
			"decimation factor must be a positive integer, got x{ratio}"
		);
		let factor = factor as u32;

		// center of the first output pixel, in source pixel coordinates
		let cx = (meta.bbox().xmin + 0.5 * meta.res_x() - src.bbox().xmin) / src.res_x() - 0.5;
		let cy = (src.bbox().ymax - (meta.bbox().ymax - 0.5 * meta.res_y())) / src.res_y() - 0.5;
		ensure!(
			(cx - cx.round()).abs() < 1e-4 && (cy - cy.round()).abs() < 1e-4,
			"decimation phases do not match: first center at source ({cx}, {cy})"
		);
		let first_col = cx.round();
		let first_row = cy.round();
		ensure!(
			first_col >= 0.0 && first_row >= 0.0,
			"decimation target overflows the source"
		);
		let last_col = first_col as u32 + (meta.width() - 1) * factor;
		let last_row = first_row as u32 + (meta.height() - 1) * factor;
		ensure!(
			last_col < src.width() && last_row < src.height(),
			"decimation target overflows the source ({last_col} >= {} or {last_row} >= {})",
			src.width(),
			src.height()
		);

		let mask = match MaskAdapter::of(source.clone()) {
			None => None,
			Some(adapter) => {
				let mask_meta = ImageMeta::new(
					meta.width(),
					meta.height(),
					1,
					SampleFormat::Uint8,
					*meta.bbox(),
					meta.crs().clone(),
				)?;
				Some(Box::new(DecimatedImage::new(Arc::new(adapter), mask_meta)?))
			}
		};

		Ok(DecimatedImage {
			meta,
			source,
			factor,
			first_col: first_col as u32,
			first_row: first_row as u32,
			mask,
		})
	}

	pub fn factor(&self) -> u32 {
		self.factor
	}

	fn read_line_generic<T: Copy + Default>(
		&self,
		y: u32,
		buffer: &mut [T],
		read: impl Fn(&dyn ImageNode, u32, &mut [T]) -> Result<()>,
	) -> Result<()> {
		let src = self.source.meta();
		let channels = src.channels() as usize;
		let mut line = vec![T::default(); src.line_len()];
		read(self.source.as_ref(), self.first_row + y * self.factor, &mut line)?;
		for x in 0..self.meta.width() as usize {
			let sx = self.first_col as usize + x * self.factor as usize;
			buffer[x * channels..(x + 1) * channels].copy_from_slice(&line[sx * channels..(sx + 1) * channels]);
		}
		Ok(())
	}
}

impl ImageNode for DecimatedImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		self.mask.as_deref().map(|m| m as &dyn ImageNode)
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |img, line, buf| img.read_line_u8(line, buf))
	}

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |img, line, buf| img.read_line_u16(line, buf))
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |img, line, buf| img.read_line_f32(line, buf))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;
	use std::sync::Arc;

	struct Index(ImageMeta);
	impl ImageNode for Index {
		fn meta(&self) -> &ImageMeta {
			&self.0
		}
		fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
			for (x, s) in buffer[..self.0.line_len()].iter_mut().enumerate() {
				*s = (y as usize * 16 + x) as u8;
			}
			Ok(())
		}
	}

	fn source() -> SharedImage {
		Arc::new(Index(
			ImageMeta::new(
				8,
				8,
				1,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
				Crs::from_id("EPSG:3857"),
			)
			.unwrap(),
		))
	}

	#[test]
	fn picks_every_second_pixel() {
		// target centers at source pixels (0,0), (2,0), ...
		let meta = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Uint8,
			BBox::new(-0.5, 0.5, 7.5, 8.5).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let decimated = DecimatedImage::new(source(), meta).unwrap();
		assert_eq!(decimated.factor(), 2);
		let mut line = vec![0u8; 4];
		decimated.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![0, 2, 4, 6]);
		decimated.read_line_u8(1, &mut line).unwrap();
		assert_eq!(line, vec![32, 34, 36, 38]);
	}

	#[test]
	fn phase_mismatch_is_refused() {
		let meta = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Uint8,
			BBox::new(0.25, 0.25, 8.25, 8.25).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		assert!(DecimatedImage::new(source(), meta).is_err());
	}

	#[test]
	fn fractional_factor_is_refused() {
		let meta = ImageMeta::new(
			5,
			5,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 7.5, 7.5).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		assert!(DecimatedImage::new(source(), meta).is_err());
	}
}
