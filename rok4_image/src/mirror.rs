//! Mirror extension.
//!
//! Wraps a source image in a frame of `size` pixels built by reflecting the
//! interior. Kernel-based interpolators can then sample beyond the real data
//! without reading out of bounds; the original bbox is restored by the node
//! consuming the interpolation.

use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::types::BBox;

pub struct MirrorImage {
	meta: ImageMeta,
	source: SharedImage,
	size: u32,
}

impl MirrorImage {
	pub fn around(source: SharedImage, size: u32) -> Result<MirrorImage> {
		ensure!(size > 0, "mirror size must be > 0");
		ensure!(
			size < source.meta().width() && size < source.meta().height(),
			"mirror size ({size}) must be smaller than the source ({}x{})",
			source.meta().width(),
			source.meta().height()
		);
		let src = source.meta();
		let mut bbox = *src.bbox();
		bbox.expand(src.res_x(), src.res_y(), size as usize);
		let meta = ImageMeta::new(
			src.width() + 2 * size,
			src.height() + 2 * size,
			src.channels(),
			src.sample_format(),
			bbox,
			src.crs().clone(),
		)?;
		Ok(MirrorImage { meta, source, size })
	}

	/// Reflects an extended coordinate back into `0..len`.
	fn reflect(position: i64, len: u32) -> u32 {
		let len = i64::from(len);
		let mut p = position;
		if p < 0 {
			p = -p;
		}
		if p >= len {
			p = 2 * len - 2 - p;
		}
		p.clamp(0, len - 1) as u32
	}

	fn read_line_generic<T: Copy + Default>(
		&self,
		y: u32,
		buffer: &mut [T],
		read: impl Fn(&dyn ImageNode, u32, &mut [T]) -> Result<()>,
	) -> Result<()> {
		let src = self.source.meta();
		let source_y = Self::reflect(i64::from(y) - i64::from(self.size), src.height());
		let mut line = vec![T::default(); src.line_len()];
		read(self.source.as_ref(), source_y, &mut line)?;

		let channels = src.channels() as usize;
		for x in 0..self.meta.width() {
			let source_x = Self::reflect(i64::from(x) - i64::from(self.size), src.width()) as usize;
			let dst = x as usize * channels;
			buffer[dst..dst + channels].copy_from_slice(&line[source_x * channels..(source_x + 1) * channels]);
		}
		Ok(())
	}
}

impl ImageNode for MirrorImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
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

/// Mirror size needed so a kernel of one-sided radius `radius` source pixels
/// never reads outside the data.
pub fn mirror_size_for(radius: f64) -> u32 {
	radius.ceil() as u32 + 1
}
