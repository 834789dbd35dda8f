//! Constant-valued image, used for nodata placeholders and backgrounds.

use crate::samples;
use crate::traits::{ImageMeta, ImageNode, check_line};
use anyhow::Result;
use rok4_core::format::SampleFormat;

pub struct EmptyImage {
	meta: ImageMeta,
	/// One value per channel, in native sample units.
	values: Vec<f32>,
}

impl EmptyImage {
	pub fn new(meta: ImageMeta, values: Vec<f32>) -> EmptyImage {
		let mut values = values;
		values.resize(meta.channels() as usize, values.last().copied().unwrap_or(0.0));
		EmptyImage { meta, values }
	}
}

impl ImageNode for EmptyImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		if self.meta.sample_format().is_float() {
			let mut tmp = vec![0f32; self.meta.line_len()];
			self.read_line_f32(y, &mut tmp)?;
			samples::f32_to_u8(&tmp, buffer);
			return Ok(());
		}
		let channels = self.meta.channels() as usize;
		for (i, sample) in buffer[..self.meta.line_len()].iter_mut().enumerate() {
			*sample = self.values[i % channels].clamp(0.0, 255.0) as u8;
		}
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		// native units for floats; integer formats follow the linear
		// 0..max ↔ 0.0..1.0 mapping of the cross-type contract
		let scale = match self.meta.sample_format() {
			SampleFormat::Float32 => 1.0,
			SampleFormat::Uint8 => 1.0 / 255.0,
			SampleFormat::Uint16 => 1.0 / 65535.0,
		};
		let channels = self.meta.channels() as usize;
		for (i, sample) in buffer[..self.meta.line_len()].iter_mut().enumerate() {
			*sample = self.values[i % channels] * scale;
		}
		Ok(())
	}
}
