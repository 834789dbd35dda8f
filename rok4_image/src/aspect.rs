//! Aspect derivation: downslope direction in degrees, 0..360.
//!
//! Below the minimum-slope threshold the direction is undefined and the
//! output is −1. Output samples are 32-bit floats.

use crate::slope::horn_gradient;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use crate::window;
use anyhow::Result;
use rok4_core::format::SampleFormat;
use std::f64::consts::PI;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectParams {
	pub res_x_meter: f64,
	pub res_y_meter: f64,
	/// Below this rise the aspect is undefined (output −1).
	pub min_slope: f64,
}

impl Default for AspectParams {
	fn default() -> Self {
		AspectParams {
			res_x_meter: 1.0,
			res_y_meter: 1.0,
			min_slope: 0.0,
		}
	}
}

pub struct AspectImage {
	meta: ImageMeta,
	source: SharedImage,
	params: AspectParams,
	aspects: Mutex<Option<Vec<f32>>>,
}

impl AspectImage {
	pub fn new(source: SharedImage, params: AspectParams) -> Result<AspectImage> {
		let src = source.meta();
		let meta = ImageMeta::new(
			src.width(),
			src.height(),
			1,
			SampleFormat::Float32,
			*src.bbox(),
			src.crs().clone(),
		)?;
		Ok(AspectImage {
			meta,
			source,
			params,
			aspects: Mutex::new(None),
		})
	}

	fn generate(&self) -> Result<Vec<f32>> {
		let width = self.meta.width() as usize;
		let mut aspects = vec![0f32; width * self.meta.height() as usize];
		let p = self.params;
		window::sweep(self.source.as_ref(), |y, above, current, below| {
			let row = &mut aspects[y as usize * width..(y as usize + 1) * width];
			for (column, out) in row.iter_mut().enumerate() {
				let (dzdx, dzdy) = horn_gradient(above, current, below, column, p.res_x_meter, p.res_y_meter);
				let rise = dzdx.hypot(dzdy);
				*out = if rise < p.min_slope {
					-1.0
				} else {
					((dzdy.atan2(dzdx) + PI).to_degrees()) as f32
				};
			}
		})?;
		Ok(aspects)
	}
}

impl ImageNode for AspectImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut tmp = vec![0f32; self.meta.line_len()];
		self.read_line_f32(y, &mut tmp)?;
		crate::samples::f32_to_u8(&tmp, buffer);
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut aspects = self.aspects.lock().unwrap();
		if aspects.is_none() {
			*aspects = Some(self.generate()?);
		}
		let width = self.meta.width() as usize;
		let data = aspects.as_ref().unwrap();
		buffer[..width].copy_from_slice(&data[y as usize * width..(y as usize + 1) * width]);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::types::BBox;
	use std::sync::Arc;

	struct EastRamp(ImageMeta);
	impl ImageNode for EastRamp {
		fn meta(&self) -> &ImageMeta {
			&self.0
		}
		fn read_line_u8(&self, _y: u32, _b: &mut [u8]) -> Result<()> {
			unreachable!()
		}
		fn read_line_f32(&self, _y: u32, buffer: &mut [f32]) -> Result<()> {
			for (x, s) in buffer[..self.0.line_len()].iter_mut().enumerate() {
				*s = x as f32;
			}
			Ok(())
		}
	}

	fn east_ramp() -> SharedImage {
		Arc::new(EastRamp(
			ImageMeta::new(
				8,
				8,
				1,
				SampleFormat::Float32,
				BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
		))
	}

	#[test]
	fn east_facing_ramp() {
		let aspect = AspectImage::new(east_ramp(), AspectParams::default()).unwrap();
		let mut line = vec![0f32; 8];
		aspect.read_line_f32(4, &mut line).unwrap();
		// dz/dx = 1, dz/dy = 0: atan2(0, 1) + pi = 180°
		assert!((line[4] - 180.0).abs() < 1e-4);
	}

	#[test]
	fn flat_ground_is_minus_one() {
		struct Flat(ImageMeta);
		impl ImageNode for Flat {
			fn meta(&self) -> &ImageMeta {
				&self.0
			}
			fn read_line_u8(&self, _y: u32, _b: &mut [u8]) -> Result<()> {
				unreachable!()
			}
			fn read_line_f32(&self, _y: u32, buffer: &mut [f32]) -> Result<()> {
				buffer[..self.0.line_len()].fill(7.0);
				Ok(())
			}
		}
		let source: SharedImage = Arc::new(Flat(
			ImageMeta::new(
				4,
				4,
				1,
				SampleFormat::Float32,
				BBox::new(0.0, 0.0, 4.0, 4.0).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
		));
		let aspect = AspectImage::new(source, AspectParams {
			min_slope: 0.01,
			..AspectParams::default()
		})
		.unwrap();
		let mut line = vec![0f32; 4];
		aspect.read_line_f32(1, &mut line).unwrap();
		assert_eq!(line, vec![-1.0; 4]);
	}

	#[test]
	fn range_is_0_to_360() {
		let aspect = AspectImage::new(east_ramp(), AspectParams::default()).unwrap();
		let mut line = vec![0f32; 8];
		for y in 0..8 {
			aspect.read_line_f32(y, &mut line).unwrap();
			for v in &line {
				assert!((-1.0..=360.0).contains(v));
			}
		}
	}
}
