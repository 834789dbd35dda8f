//! Palette application: single-channel input, RGB(A) output.

use crate::style::Palette;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::format::SampleFormat;

pub struct StyledImage {
	meta: ImageMeta,
	source: SharedImage,
	palette: Palette,
}

impl StyledImage {
	pub fn new(source: SharedImage, palette: Palette) -> Result<StyledImage> {
		let src = source.meta();
		ensure!(src.channels() == 1, "a palette applies to single-channel images");
		let meta = ImageMeta::new(
			src.width(),
			src.height(),
			palette.out_channels(),
			SampleFormat::Uint8,
			*src.bbox(),
			src.crs().clone(),
		)?;
		Ok(StyledImage { meta, source, palette })
	}

	/// Palette breakpoints are expressed in source native units.
	fn native_scale(&self) -> f64 {
		match self.source.meta().sample_format() {
			SampleFormat::Float32 => 1.0,
			SampleFormat::Uint8 => 255.0,
			SampleFormat::Uint16 => 65535.0,
		}
	}
}

impl ImageNode for StyledImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		self.source.mask()
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut line = vec![0f32; self.source.meta().line_len()];
		self.source.read_line_f32(y, &mut line)?;
		let channels = self.meta.channels() as usize;
		let scale = self.native_scale();
		for (x, value) in line.iter().enumerate() {
			let color = self.palette.lookup(f64::from(*value) * scale);
			buffer[x * channels..(x + 1) * channels].copy_from_slice(&color[..channels]);
		}
		Ok(())
	}
}
