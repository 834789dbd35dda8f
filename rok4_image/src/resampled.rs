//! Separable kernel resampling.
//!
//! The source is convolved with the kernel along x, the x-filtered lines are
//! kept in a small direct-mapped cache, and the output line is the weighted
//! combination of the cached lines along y. The source should carry mirror
//! margins (see [`MirrorImage`](crate::MirrorImage)) when the target bbox
//! touches its edges. Masks are always resampled with nearest neighbour,
//! whatever the image kernel.

use crate::kernel::Kernel;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::format::SampleFormat;
use std::sync::Mutex;

pub struct ResampledImage {
	meta: ImageMeta,
	source: SharedImage,
	kernel: Kernel,
	ratio_y: f64,
	/// Per output column: first source column and normalized weights.
	x_weights: Vec<(i64, Vec<f64>)>,
	/// Per output column: whether its center falls inside the source.
	x_in_bounds: Vec<bool>,
	/// x-filtered source lines, direct-mapped by source y.
	cache: Mutex<Vec<Option<(u32, Vec<f32>)>>>,
	mask: Option<Box<ResampledImage>>,
}

impl ResampledImage {
	/// Resamples `source` onto the geometry `meta` (same CRS, any phase and
	/// resolution). `source_mask`, when given, becomes this image's mask,
	/// resampled with nearest neighbour.
	pub fn new(
		source: SharedImage,
		meta: ImageMeta,
		kernel: Kernel,
		source_mask: Option<SharedImage>,
	) -> Result<ResampledImage> {
		ensure!(
			source.meta().crs().id() == meta.crs().id(),
			"resampling works within one CRS, got {} -> {}",
			source.meta().crs(),
			meta.crs()
		);
		ensure!(
			source.meta().channels() == meta.channels(),
			"resampling does not change the channel count"
		);

		let src = source.meta().clone();
		let ratio_x = meta.res_x() / src.res_x();
		let ratio_y = meta.res_y() / src.res_y();

		let mut x_in_bounds = Vec::with_capacity(meta.width() as usize);
		let x_weights = (0..meta.width())
			.map(|x| {
				let coord = meta.bbox().xmin + (f64::from(x) + 0.5) * meta.res_x();
				let center = (coord - src.bbox().xmin) / src.res_x() - 0.5;
				x_in_bounds.push(center >= -0.5 && center <= f64::from(src.width()) - 0.5);
				kernel.weights(center, ratio_x)
			})
			.collect();

		let cache_lines = (kernel.size(ratio_y).ceil() as usize) * 2 + 2;
		let mask = match source_mask {
			None => None,
			Some(m) => Some(Box::new(ResampledImage::new(
				m,
				ImageMeta::new(
					meta.width(),
					meta.height(),
					1,
					SampleFormat::Uint8,
					*meta.bbox(),
					meta.crs().clone(),
				)?,
				Kernel::NearestNeighbour,
				None,
			)?)),
		};

		Ok(ResampledImage {
			meta,
			source,
			kernel,
			ratio_y,
			x_weights,
			x_in_bounds,
			cache: Mutex::new(vec![None; cache_lines]),
			mask,
		})
	}

	/// Source line convolved along x, from cache or computed.
	fn x_filtered_line(&self, source_y: u32) -> Result<Vec<f32>> {
		let mut cache = self.cache.lock().unwrap();
		let slot = source_y as usize % cache.len();
		if let Some((y, line)) = &cache[slot] {
			if *y == source_y {
				return Ok(line.clone());
			}
		}

		let src = self.source.meta();
		let channels = src.channels() as usize;
		let mut source_line = vec![0f32; src.line_len()];
		self.source.read_line_f32(source_y, &mut source_line)?;

		let mut filtered = vec![0f32; self.meta.line_len()];
		for (x, (first, weights)) in self.x_weights.iter().enumerate() {
			for (i, weight) in weights.iter().enumerate() {
				let sx = (first + i as i64).clamp(0, i64::from(src.width()) - 1) as usize;
				for c in 0..channels {
					filtered[x * channels + c] += (*weight as f32) * source_line[sx * channels + c];
				}
			}
		}
		cache[slot] = Some((source_y, filtered.clone()));
		Ok(filtered)
	}
}

impl ImageNode for ResampledImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		self.mask.as_deref().map(|m| m as &dyn ImageNode)
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
		let src = self.source.meta();
		let coord = self.meta.bbox().ymax - (f64::from(y) + 0.5) * self.meta.res_y();
		let center = (src.bbox().ymax - coord) / src.res_y() - 0.5;

		buffer[..self.meta.line_len()].fill(0.0);
		// rows outside the source raster read as zero (for masks: no data)
		if center < -0.5 || center > f64::from(src.height()) - 0.5 {
			return Ok(());
		}

		let (first, weights) = self.kernel.weights(center, self.ratio_y);
		for (i, weight) in weights.iter().enumerate() {
			let sy = (first + i as i64).clamp(0, i64::from(src.height()) - 1) as u32;
			let line = self.x_filtered_line(sy)?;
			for (out, sample) in buffer[..self.meta.line_len()].iter_mut().zip(&line) {
				*out += (*weight as f32) * sample;
			}
		}
		// columns outside the source raster read as zero too
		let channels = self.meta.channels() as usize;
		for (x, in_bounds) in self.x_in_bounds.iter().enumerate() {
			if !in_bounds {
				buffer[x * channels..(x + 1) * channels].fill(0.0);
			}
		}
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

	fn meta(bbox: BBox, width: u32, height: u32, channels: u16) -> ImageMeta {
		ImageMeta::new(width, height, channels, SampleFormat::Uint8, bbox, Crs::from_id("EPSG:3857")).unwrap()
	}

	struct Checker(ImageMeta);
	impl ImageNode for Checker {
		fn meta(&self) -> &ImageMeta {
			&self.0
		}
		fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
			for (x, s) in buffer[..self.0.line_len()].iter_mut().enumerate() {
				*s = if (x + y as usize) % 2 == 0 { 0 } else { 255 };
			}
			Ok(())
		}
	}

	#[test]
	fn constant_image_stays_constant() {
		let source: SharedImage = Arc::new(EmptyImage::new(
			meta(BBox::new(0.0, 0.0, 16.0, 16.0).unwrap(), 16, 16, 1),
			vec![100.0],
		));
		let target = meta(BBox::new(2.0, 2.0, 14.0, 14.0).unwrap(), 24, 24, 1);
		let resampled = ResampledImage::new(source, target, Kernel::Cubic, None).unwrap();
		let mut line = vec![0u8; 24];
		resampled.read_line_u8(12, &mut line).unwrap();
		assert_eq!(line, vec![100u8; 24]);
	}

	#[test]
	fn identity_resampling_reproduces_the_source() {
		let source: SharedImage = Arc::new(Checker(meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 8, 8, 1)));
		let target = meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 8, 8, 1);
		let resampled = ResampledImage::new(source.clone(), target, Kernel::Linear, None).unwrap();
		let mut expected = vec![0u8; 8];
		let mut got = vec![0u8; 8];
		for y in 0..8 {
			source.read_line_u8(y, &mut expected).unwrap();
			resampled.read_line_u8(y, &mut got).unwrap();
			assert_eq!(expected, got, "line {y}");
		}
	}

	#[test]
	fn mask_uses_nearest_neighbour() {
		let source: SharedImage = Arc::new(EmptyImage::new(
			meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 8, 8, 1),
			vec![7.0],
		));
		// half-covered mask: left half data, right half empty
		struct HalfMask(ImageMeta);
		impl ImageNode for HalfMask {
			fn meta(&self) -> &ImageMeta {
				&self.0
			}
			fn read_line_u8(&self, _y: u32, buffer: &mut [u8]) -> Result<()> {
				let w = self.0.width() as usize;
				buffer[..w / 2].fill(255);
				buffer[w / 2..w].fill(0);
				Ok(())
			}
		}
		let mask: SharedImage = Arc::new(HalfMask(meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 8, 8, 1)));
		let target = meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 16, 16, 1);
		let resampled = ResampledImage::new(source, target, Kernel::Lanczos3, Some(mask)).unwrap();

		let mask_node = resampled.mask().unwrap();
		let mut line = vec![0u8; 16];
		mask_node.read_line_u8(0, &mut line).unwrap();
		// nearest neighbour keeps the mask binary
		assert!(line.iter().all(|&v| v == 0 || v == 255));
		assert_eq!(&line[..6], &[255; 6]);
		assert_eq!(&line[10..], &[0; 6]);
	}

	#[test]
	fn cross_crs_is_refused() {
		let source: SharedImage = Arc::new(EmptyImage::new(
			meta(BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(), 8, 8, 1),
			vec![0.0],
		));
		let target = ImageMeta::new(
			8,
			8,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
			Crs::from_id("EPSG:4326"),
		)
		.unwrap();
		assert!(ResampledImage::new(source, target, Kernel::Linear, None).is_err());
	}
}
