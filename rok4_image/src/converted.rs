//! A standalone node applying a [`PixelConverter`] between two nodes that do
//! not own one themselves.

use crate::converter::PixelConverter;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::Result;
use rok4_core::format::SampleFormat;

pub struct ConvertedChannelsImage {
	meta: ImageMeta,
	source: SharedImage,
	converter: PixelConverter,
}

impl ConvertedChannelsImage {
	pub fn new(source: SharedImage, out_channels: u16) -> Result<ConvertedChannelsImage> {
		let converter = PixelConverter::new(source.meta().sample_format(), source.meta().channels(), out_channels)?;
		let meta = ImageMeta::new(
			source.meta().width(),
			source.meta().height(),
			out_channels,
			SampleFormat::Uint8,
			*source.meta().bbox(),
			source.meta().crs().clone(),
		)?;
		Ok(ConvertedChannelsImage { meta, source, converter })
	}
}

impl ImageNode for ConvertedChannelsImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		self.source.mask()
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut src = vec![0u8; self.source.meta().line_len()];
		self.source.read_line_u8(y, &mut src)?;
		self.converter.convert_line(self.meta.width() as usize, &src, buffer);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::empty::EmptyImage;
	use rok4_core::crs::Crs;
	use rok4_core::types::BBox;
	use std::sync::Arc;

	#[test]
	fn converts_between_nodes() {
		let meta = ImageMeta::new(
			2,
			1,
			3,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 2.0, 1.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let source = Arc::new(EmptyImage::new(meta, vec![100.0, 100.0, 100.0]));
		let converted = ConvertedChannelsImage::new(source, 1).unwrap();
		let mut line = vec![0u8; 2];
		converted.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![100, 100]);
	}

	#[test]
	fn identity_is_refused() {
		let meta = ImageMeta::new(
			2,
			1,
			3,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 2.0, 1.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let source = Arc::new(EmptyImage::new(meta, vec![0.0; 3]));
		assert!(ConvertedChannelsImage::new(source, 3).is_err());
	}
}
