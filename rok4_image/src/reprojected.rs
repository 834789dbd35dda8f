//! Cross-CRS resampling.
//!
//! At construction, every target pixel center is projected into the source
//! CRS through the [`Reprojector`] and stored as fractional source pixel
//! coordinates. Reading a line then samples the source with the kernel at
//! each grid point; pixels whose centers have no image in the source CRS
//! (or fall outside the source raster) are assigned nodata. The source is
//! expected to carry a nodata margin wider than the kernel radius, built
//! with extended compound + mirrors.

use crate::kernel::Kernel;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::crs::Reprojector;
use rok4_core::format::SampleFormat;
use std::sync::{Arc, Mutex};

/// Fractional source pixel position of each target pixel center, row-major;
/// `None` marks centers outside the source CRS definition area.
type SourceGrid = Arc<Vec<Option<(f64, f64)>>>;

pub struct ReprojectedImage {
	meta: ImageMeta,
	source: SharedImage,
	kernel: Kernel,
	ratio_x: f64,
	ratio_y: f64,
	grid: SourceGrid,
	nodata: Vec<f32>,
	cache: Mutex<Vec<Option<(u32, Vec<f32>)>>>,
	mask: Option<Box<ReprojectedImage>>,
}

impl ReprojectedImage {
	pub fn new(
		source: SharedImage,
		meta: ImageMeta,
		kernel: Kernel,
		reprojector: &dyn Reprojector,
		nodata: Vec<f32>,
		source_mask: Option<SharedImage>,
	) -> Result<ReprojectedImage> {
		let src = source.meta().clone();
		ensure!(
			reprojector.handles(meta.crs(), src.crs()),
			"no reprojection path from {} to {}",
			meta.crs(),
			src.crs()
		);
		ensure!(
			nodata.len() >= meta.channels() as usize,
			"nodata must provide {} values",
			meta.channels()
		);

		let mut grid = Vec::with_capacity(meta.width() as usize * meta.height() as usize);
		for y in 0..meta.height() {
			let ty = meta.bbox().ymax - (f64::from(y) + 0.5) * meta.res_y();
			for x in 0..meta.width() {
				let tx = meta.bbox().xmin + (f64::from(x) + 0.5) * meta.res_x();
				grid.push(reprojector.reproject_point(tx, ty, meta.crs(), src.crs()).map(|(sx, sy)| {
					(
						(sx - src.bbox().xmin) / src.res_x() - 0.5,
						(src.bbox().ymax - sy) / src.res_y() - 0.5,
					)
				}));
			}
		}
		let grid: SourceGrid = Arc::new(grid);

		// resampling ratios estimated by projecting the target bbox
		let projected = reprojector
			.reproject_bbox(meta.bbox(), meta.crs(), src.crs())
			.unwrap_or(*src.bbox());
		let ratio_x = (projected.width() / f64::from(meta.width())) / src.res_x();
		let ratio_y = (projected.height() / f64::from(meta.height())) / src.res_y();

		let cache_lines = (kernel.size(ratio_y).ceil() as usize) * 2 + 2;
		// the mask gets its own grid: its geometry is the bare footprint,
		// not the mirrored extension of the image source
		let mask = match source_mask {
			None => None,
			Some(m) => Some(Box::new(ReprojectedImage::new(
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
				reprojector,
				vec![0.0],
				None,
			)?)),
		};

		Ok(ReprojectedImage {
			meta,
			source,
			kernel,
			ratio_x,
			ratio_y,
			grid,
			nodata,
			cache: Mutex::new(vec![None; cache_lines]),
			mask,
		})
	}

	fn source_line(&self, y: u32) -> Result<Vec<f32>> {
		let mut cache = self.cache.lock().unwrap();
		let slot = y as usize % cache.len();
		if let Some((cached_y, line)) = &cache[slot] {
			if *cached_y == y {
				return Ok(line.clone());
			}
		}
		let mut line = vec![0f32; self.source.meta().line_len()];
		self.source.read_line_f32(y, &mut line)?;
		cache[slot] = Some((y, line.clone()));
		Ok(line)
	}

	fn nodata_scaled(&self) -> Vec<f32> {
		let scale = match self.meta.sample_format() {
			SampleFormat::Float32 => 1.0,
			SampleFormat::Uint8 => 1.0 / 255.0,
			SampleFormat::Uint16 => 1.0 / 65535.0,
		};
		self.nodata.iter().map(|v| v * scale).collect()
	}
}

impl ImageNode for ReprojectedImage {
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
		let channels = self.meta.channels() as usize;
		let nodata = self.nodata_scaled();
		let row = &self.grid[y as usize * self.meta.width() as usize..(y as usize + 1) * self.meta.width() as usize];

		for (x, point) in row.iter().enumerate() {
			let out = &mut buffer[x * channels..(x + 1) * channels];
			let Some((sx, sy)) = point else {
				out.copy_from_slice(&nodata[..channels]);
				continue;
			};
			// centers outside the extended source raster are nodata too
			if *sx < -0.5
				|| *sy < -0.5
				|| *sx > f64::from(src.width()) - 0.5
				|| *sy > f64::from(src.height()) - 0.5
			{
				out.copy_from_slice(&nodata[..channels]);
				continue;
			}

			let (first_y, weights_y) = self.kernel.weights(*sy, self.ratio_y);
			let (first_x, weights_x) = self.kernel.weights(*sx, self.ratio_x);
			out.fill(0.0);
			for (iy, wy) in weights_y.iter().enumerate() {
				let line_y = (first_y + iy as i64).clamp(0, i64::from(src.height()) - 1) as u32;
				let line = self.source_line(line_y)?;
				for (ix, wx) in weights_x.iter().enumerate() {
					let col = (first_x + ix as i64).clamp(0, i64::from(src.width()) - 1) as usize;
					let weight = (wy * wx) as f32;
					for c in 0..channels {
						out[c] += weight * line[col * channels + c];
					}
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::empty::EmptyImage;
	use rok4_core::crs::{Crs, SphericalMercator};
	use rok4_core::types::BBox;

	#[test]
	fn constant_source_reprojects_to_constant() {
		// a patch of western Europe in lon/lat, read in web mercator
		let source: SharedImage = Arc::new(EmptyImage::new(
			ImageMeta::new(
				64,
				64,
				1,
				SampleFormat::Uint8,
				BBox::new(0.0, 44.0, 4.0, 48.0).unwrap(),
				Crs::from_id("EPSG:4326"),
			)
			.unwrap(),
			vec![120.0],
		));
		let target = ImageMeta::new(
			32,
			32,
			1,
			SampleFormat::Uint8,
			BBox::new(111319.0, 5465442.0, 334958.0, 5965442.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let reprojected =
			ReprojectedImage::new(source, target, Kernel::Cubic, &SphericalMercator, vec![0.0], None).unwrap();

		let mut line = vec![0u8; 32];
		reprojected.read_line_u8(16, &mut line).unwrap();
		assert_eq!(line, vec![120u8; 32]);
	}

	#[test]
	fn out_of_source_pixels_are_nodata() {
		// source covers only the eastern half of the target
		let source: SharedImage = Arc::new(EmptyImage::new(
			ImageMeta::new(
				32,
				32,
				1,
				SampleFormat::Uint8,
				BBox::new(2.0, 44.0, 4.0, 48.0).unwrap(),
				Crs::from_id("EPSG:4326"),
			)
			.unwrap(),
			vec![120.0],
		));
		let target = ImageMeta::new(
			32,
			32,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 5465442.0, 445277.0, 5965442.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let reprojected = ReprojectedImage::new(
			source,
			target,
			Kernel::NearestNeighbour,
			&SphericalMercator,
			vec![255.0],
			None,
		)
		.unwrap();

		let mut line = vec![0u8; 32];
		reprojected.read_line_u8(16, &mut line).unwrap();
		assert_eq!(line[0], 255, "west of the source must be nodata");
		assert_eq!(line[31], 120, "east must come from the source");
	}

	#[test]
	fn unknown_crs_pair_is_refused() {
		let source: SharedImage = Arc::new(EmptyImage::new(
			ImageMeta::new(
				8,
				8,
				1,
				SampleFormat::Uint8,
				BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
				Crs::from_id("EPSG:2154"),
			)
			.unwrap(),
			vec![0.0],
		));
		let target = ImageMeta::new(
			8,
			8,
			1,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 8.0, 8.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		assert!(ReprojectedImage::new(source, target, Kernel::Linear, &SphericalMercator, vec![0.0], None).is_err());
	}
}
