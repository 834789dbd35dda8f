//! Hillshade derivation.
//!
//! A 3×3 directional convolution whose weights are the sines of the sun
//! azimuth offset by the eight neighbour directions, plus a zenithal +8/−1
//! light component scaled by the sun elevation. The result is exaggerated,
//! shifted by `center` and clamped to one unsigned byte.

use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use crate::window;
use anyhow::Result;
use rok4_core::format::SampleFormat;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HillshadeParams {
	/// Sun azimuth in degrees, clockwise from north.
	pub azimuth: f64,
	/// Sun zenith angle in degrees (0 = overhead).
	pub zenith: f64,
	pub exaggeration: f32,
	/// Offset added to the convolved value before clamping.
	pub center: u8,
}

impl Default for HillshadeParams {
	fn default() -> Self {
		HillshadeParams {
			azimuth: 315.0,
			zenith: 45.0,
			exaggeration: 1.0,
			center: 0,
		}
	}
}

pub struct HillshadeImage {
	meta: ImageMeta,
	source: SharedImage,
	matrix: [f64; 9],
	exaggeration: f32,
	center: u8,
	shaded: Mutex<Option<Vec<u8>>>,
}

impl HillshadeImage {
	pub fn new(source: SharedImage, params: HillshadeParams) -> Result<HillshadeImage> {
		let src = source.meta();
		let meta = ImageMeta::new(
			src.width(),
			src.height(),
			1,
			SampleFormat::Uint8,
			*src.bbox(),
			src.crs().clone(),
		)?;

		let azimuth = params.azimuth.to_radians();
		let mut matrix = [
			(azimuth - FRAC_PI_4).sin(),
			azimuth.sin(),
			(azimuth + FRAC_PI_4).sin(),
			(azimuth - FRAC_PI_2).sin(),
			0.0,
			(azimuth + FRAC_PI_2).sin(),
			(azimuth - FRAC_PI_4 - FRAC_PI_2).sin(),
			(azimuth + PI).sin(),
			(azimuth + FRAC_PI_4 + FRAC_PI_2).sin(),
		];
		// zenithal light: strong center weight, uniform pull on neighbours
		let zenithal = params.zenith.to_radians().cos();
		for (i, weight) in matrix.iter_mut().enumerate() {
			*weight += if i == 4 { 8.0 * zenithal } else { -zenithal };
		}

		Ok(HillshadeImage {
			meta,
			source,
			matrix,
			exaggeration: params.exaggeration,
			center: params.center,
			shaded: Mutex::new(None),
		})
	}

	fn generate(&self) -> Result<Vec<u8>> {
		let width = self.meta.width() as usize;
		let mut shaded = vec![0u8; width * self.meta.height() as usize];
		let m = &self.matrix;
		window::sweep(self.source.as_ref(), |y, above, current, below| {
			let row = &mut shaded[y as usize * width..(y as usize + 1) * width];
			for (column, out) in row.iter_mut().enumerate() {
				let value = m[0] * f64::from(window::at(above, column, -1))
					+ m[1] * f64::from(window::at(above, column, 0))
					+ m[2] * f64::from(window::at(above, column, 1))
					+ m[3] * f64::from(window::at(current, column, -1))
					+ m[4] * f64::from(window::at(current, column, 0))
					+ m[5] * f64::from(window::at(current, column, 1))
					+ m[6] * f64::from(window::at(below, column, -1))
					+ m[7] * f64::from(window::at(below, column, 0))
					+ m[8] * f64::from(window::at(below, column, 1));
				let value = value * f64::from(self.exaggeration) + f64::from(self.center);
				*out = value.clamp(0.0, 255.0) as u8;
			}
		})?;
		Ok(shaded)
	}
}

impl ImageNode for HillshadeImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let mut shaded = self.shaded.lock().unwrap();
		if shaded.is_none() {
			*shaded = Some(self.generate()?);
		}
		let width = self.meta.width() as usize;
		let data = shaded.as_ref().unwrap();
		buffer[..width].copy_from_slice(&data[y as usize * width..(y as usize + 1) * width]);
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

	fn dem(values: Vec<f32>) -> SharedImage {
		struct Dem(ImageMeta, Vec<f32>);
		impl ImageNode for Dem {
			fn meta(&self) -> &ImageMeta {
				&self.0
			}
			fn read_line_u8(&self, _y: u32, _b: &mut [u8]) -> Result<()> {
				unreachable!()
			}
			fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
				let w = self.0.width() as usize;
				buffer[..w].copy_from_slice(&self.1[y as usize * w..(y as usize + 1) * w]);
				Ok(())
			}
		}
		let side = (values.len() as f64).sqrt() as u32;
		Arc::new(Dem(
			ImageMeta::new(
				side,
				side,
				1,
				SampleFormat::Float32,
				BBox::new(0.0, 0.0, f64::from(side), f64::from(side)).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
			values,
		))
	}

	#[test]
	fn flat_terrain_shades_to_center() {
		let source: SharedImage = Arc::new(EmptyImage::new(
			ImageMeta::new(
				8,
				8,
				1,
				SampleFormat::Float32,
				BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
			vec![500.0],
		));
		let shade = HillshadeImage::new(source, HillshadeParams {
			center: 127,
			..HillshadeParams::default()
		})
		.unwrap();
		let mut line = vec![0u8; 8];
		shade.read_line_u8(4, &mut line).unwrap();
		// flat ground: the convolution cancels, only the center offset remains
		assert_eq!(line, vec![127u8; 8]);
	}

	#[test]
	fn output_is_clamped_gray() {
		// a sharp step lit from the north-west
		let mut values = vec![0f32; 16];
		values[5] = 1000.0;
		let shade = HillshadeImage::new(dem(values), HillshadeParams::default()).unwrap();
		let mut line = vec![0u8; 4];
		for y in 0..4 {
			shade.read_line_u8(y, &mut line).unwrap();
		}
		assert_eq!(shade.meta().channels(), 1);
		assert_eq!(shade.meta().sample_format(), SampleFormat::Uint8);
	}
}
