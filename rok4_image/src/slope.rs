//! Slope derivation (Horn's method on a 3×3 window).

use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use crate::window;
use anyhow::Result;
use rok4_core::format::SampleFormat;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeUnit {
	Degree,
	Percent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeParams {
	/// Ground size of one pixel along x, in meters.
	pub res_x_meter: f64,
	/// Ground size of one pixel along y, in meters.
	pub res_y_meter: f64,
	pub unit: SlopeUnit,
	/// Slopes below this threshold become `nodata`.
	pub min_slope: f64,
	/// Slopes above this are clamped.
	pub max_slope: f64,
	pub nodata: u8,
}

impl Default for SlopeParams {
	fn default() -> Self {
		SlopeParams {
			res_x_meter: 1.0,
			res_y_meter: 1.0,
			unit: SlopeUnit::Degree,
			min_slope: 0.0,
			max_slope: 90.0,
			nodata: 0,
		}
	}
}

pub struct SlopeImage {
	meta: ImageMeta,
	source: SharedImage,
	params: SlopeParams,
	slopes: Mutex<Option<Vec<u8>>>,
}

impl SlopeImage {
	pub fn new(source: SharedImage, params: SlopeParams) -> Result<SlopeImage> {
		let src = source.meta();
		let meta = ImageMeta::new(
			src.width(),
			src.height(),
			1,
			SampleFormat::Uint8,
			*src.bbox(),
			src.crs().clone(),
		)?;
		Ok(SlopeImage {
			meta,
			source,
			params,
			slopes: Mutex::new(None),
		})
	}

	fn generate(&self) -> Result<Vec<u8>> {
		let width = self.meta.width() as usize;
		let mut slopes = vec![0u8; width * self.meta.height() as usize];
		let p = self.params;
		window::sweep(self.source.as_ref(), |y, above, current, below| {
			let row = &mut slopes[y as usize * width..(y as usize + 1) * width];
			for (column, out) in row.iter_mut().enumerate() {
				let (dzdx, dzdy) = horn_gradient(above, current, below, column, p.res_x_meter, p.res_y_meter);
				let rise = dzdx.hypot(dzdy);
				let slope = match p.unit {
					SlopeUnit::Degree => {
						let degrees = rise.atan().to_degrees();
						if degrees > 90.0 { 180.0 - degrees } else { degrees }
					}
					SlopeUnit::Percent => rise * 100.0,
				};
				*out = if slope < p.min_slope {
					p.nodata
				} else {
					slope.min(p.max_slope).round() as u8
				};
			}
		})?;
		Ok(slopes)
	}
}

/// Horn's weighted differences over the 3×3 window around `column`.
pub(crate) fn horn_gradient(
	above: &[f32],
	current: &[f32],
	below: &[f32],
	column: usize,
	res_x: f64,
	res_y: f64,
) -> (f64, f64) {
	let a = |line: &[f32], offset: i64| f64::from(window::at(line, column, offset));
	let dzdx = ((a(above, 1) + 2.0 * a(current, 1) + a(below, 1)) - (a(above, -1) + 2.0 * a(current, -1) + a(below, -1)))
		/ (8.0 * res_x);
	let dzdy = ((a(below, -1) + 2.0 * a(below, 0) + a(below, 1)) - (a(above, -1) + 2.0 * a(above, 0) + a(above, 1)))
		/ (8.0 * res_y);
	(dzdx, dzdy)
}

impl ImageNode for SlopeImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut slopes = self.slopes.lock().unwrap();
		if slopes.is_none() {
			*slopes = Some(self.generate()?);
		}
		let width = self.meta.width() as usize;
		let data = slopes.as_ref().unwrap();
		buffer[..width].copy_from_slice(&data[y as usize * width..(y as usize + 1) * width]);
		Ok(())
	}
}
