//! Mosaic nodes.
//!
//! [`CompoundImage`] abuts a rectangular grid of compatible images into one
//! virtual raster. [`ExtendedCompoundImage`] overlays any number of images
//! onto a target bbox, filling uncovered pixels with nodata; children are
//! applied in insertion order so later children win, except where a child's
//! mask declares a pixel empty, in which case the children below show
//! through. [`ExtendedCompoundMask`] is the OR of child masks over the same
//! target.

use crate::samples;
use crate::traits::{ImageMeta, ImageNode, SharedImage, check_line};
use anyhow::{Result, ensure};
use rok4_core::format::SampleFormat;
use rok4_core::types::BBox;

pub struct CompoundImage {
	meta: ImageMeta,
	children: Vec<SharedImage>,
	grid_width: usize,
	/// Pixel row of the top of each grid row.
	row_offsets: Vec<u32>,
	/// Pixel column of the left edge of each grid column.
	col_offsets: Vec<u32>,
}

impl CompoundImage {
	/// `children` are row-major, top-left first, `grid_width` per row.
	pub fn new(children: Vec<SharedImage>, grid_width: usize) -> Result<CompoundImage> {
		ensure!(grid_width > 0, "grid width must be > 0");
		ensure!(
			!children.is_empty() && children.len() % grid_width == 0,
			"child count ({}) must be a positive multiple of the grid width ({grid_width})",
			children.len()
		);
		let grid_height = children.len() / grid_width;
		let first = children[0].meta();

		for child in &children[1..] {
			ensure!(
				child.meta().is_compatible_with(first) || first.is_compatible_with(child.meta()),
				"compound children must be mutually compatible"
			);
			ensure!(
				child.meta().channels() == first.channels(),
				"compound children must share the channel count"
			);
		}

		let mut col_offsets = vec![0u32; grid_width];
		for col in 1..grid_width {
			col_offsets[col] = col_offsets[col - 1] + children[col - 1].meta().width();
		}
		let mut row_offsets = vec![0u32; grid_height];
		for row in 1..grid_height {
			row_offsets[row] = row_offsets[row - 1] + children[(row - 1) * grid_width].meta().height();
		}
		let width = col_offsets[grid_width - 1] + children[grid_width - 1].meta().width();
		let height = row_offsets[grid_height - 1] + children[(grid_height - 1) * grid_width].meta().height();

		// grid geometry must be consistent: every row shares its height,
		// every column its width
		for (i, child) in children.iter().enumerate() {
			let (row, col) = (i / grid_width, i % grid_width);
			ensure!(
				child.meta().width() == children[col].meta().width(),
				"grid column {col} mixes widths"
			);
			ensure!(
				child.meta().height() == children[row * grid_width].meta().height(),
				"grid row {row} mixes heights"
			);
		}

		let top_left = children[0].meta().bbox();
		let bottom_right = children[children.len() - 1].meta().bbox();
		let bbox = BBox::new(top_left.xmin, bottom_right.ymin, bottom_right.xmax, top_left.ymax)?;
		let meta = ImageMeta::new(
			width,
			height,
			first.channels(),
			first.sample_format(),
			bbox,
			first.crs().clone(),
		)?;

		Ok(CompoundImage {
			meta,
			children,
			grid_width,
			row_offsets,
			col_offsets,
		})
	}

	fn grid_row_of(&self, y: u32) -> usize {
		match self.row_offsets.binary_search(&y) {
			Ok(row) => row,
			Err(next) => next - 1,
		}
	}

	fn read_line_generic<T: Copy + Default>(
		&self,
		y: u32,
		buffer: &mut [T],
		read: impl Fn(&dyn ImageNode, u32, &mut [T]) -> Result<()>,
	) -> Result<()> {
		let row = self.grid_row_of(y);
		let child_y = y - self.row_offsets[row];
		let channels = self.meta.channels() as usize;
		let mut child_line: Vec<T> = Vec::new();
		for col in 0..self.grid_width {
			let child = &self.children[row * self.grid_width + col];
			child_line.resize(child.meta().line_len(), T::default());
			read(child.as_ref(), child_y, &mut child_line)?;
			let start = self.col_offsets[col] as usize * channels;
			buffer[start..start + child.meta().line_len()].copy_from_slice(&child_line);
		}
		Ok(())
	}
}

impl ImageNode for CompoundImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |child, line, buf| child.read_line_u8(line, buf))
	}

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |child, line, buf| child.read_line_u16(line, buf))
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		self.read_line_generic(y, buffer, |child, line, buf| child.read_line_f32(line, buf))
	}
}

/// Pixel placement of one child inside an extended compound target.
struct Placement {
	/// First target row covered by the child.
	row_offset: i64,
	/// First target column covered by the child.
	col_offset: i64,
}

pub struct ExtendedCompoundImage {
	meta: ImageMeta,
	children: Vec<SharedImage>,
	placements: Vec<Placement>,
	nodata: Vec<f32>,
	mask: ExtendedCompoundMask,
}

impl ExtendedCompoundImage {
	/// Overlays `children` (draw order, first at the back) onto the target
	/// geometry `meta`. Children must be compatible with the target and
	/// share its channel count; `nodata` holds one native-unit value per
	/// channel.
	pub fn new(meta: ImageMeta, children: Vec<SharedImage>, nodata: Vec<f32>) -> Result<ExtendedCompoundImage> {
		ensure!(!children.is_empty(), "an extended compound needs at least one child");
		ensure!(
			nodata.len() >= meta.channels() as usize,
			"nodata must provide {} values, got {}",
			meta.channels(),
			nodata.len()
		);
		let placements = children
			.iter()
			.map(|child| {
				ensure!(
					child.meta().is_compatible_with(&meta),
					"extended compound child is not compatible with the target"
				);
				ensure!(
					child.meta().channels() == meta.channels(),
					"extended compound child has {} channels, target has {}",
					child.meta().channels(),
					meta.channels()
				);
				Ok(Placement {
					row_offset: ((meta.bbox().ymax - child.meta().bbox().ymax) / meta.res_y()).round() as i64,
					col_offset: ((child.meta().bbox().xmin - meta.bbox().xmin) / meta.res_x()).round() as i64,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		let mask_meta = ImageMeta::new(
			meta.width(),
			meta.height(),
			1,
			SampleFormat::Uint8,
			*meta.bbox(),
			meta.crs().clone(),
		)?;
		let mask_placements = placements
			.iter()
			.map(|p| Placement {
				row_offset: p.row_offset,
				col_offset: p.col_offset,
			})
			.collect();
		let mask = ExtendedCompoundMask {
			meta: mask_meta,
			children: children.clone(),
			placements: mask_placements,
		};

		Ok(ExtendedCompoundImage {
			meta,
			children,
			placements,
			nodata,
			mask,
		})
	}

	/// Horizontal overlap of a child with the target, in (target start
	/// column, child start column, pixel count).
	fn column_span(&self, placement: &Placement, child_width: u32) -> Option<(usize, usize, usize)> {
		let target_start = placement.col_offset.max(0);
		let target_end = (placement.col_offset + i64::from(child_width)).min(i64::from(self.meta.width()));
		if target_start >= target_end {
			return None;
		}
		Some((
			target_start as usize,
			(target_start - placement.col_offset) as usize,
			(target_end - target_start) as usize,
		))
	}

	fn read_line_generic<T: Copy>(
		&self,
		y: u32,
		buffer: &mut [T],
		fill: &[T],
		read: impl Fn(&dyn ImageNode, u32, &mut [T]) -> Result<()>,
	) -> Result<()> {
		let channels = self.meta.channels() as usize;
		for (i, sample) in buffer[..self.meta.line_len()].iter_mut().enumerate() {
			*sample = fill[i % channels];
		}

		for (child, placement) in self.children.iter().zip(&self.placements) {
			let child_line = i64::from(y) - placement.row_offset;
			if child_line < 0 || child_line >= i64::from(child.meta().height()) {
				continue;
			}
			let Some((target_start, child_start, count)) = self.column_span(placement, child.meta().width()) else {
				continue;
			};

			let mut line = vec![fill[0]; child.meta().line_len()];
			read(child.as_ref(), child_line as u32, &mut line)?;

			match child.mask() {
				None => {
					buffer[target_start * channels..(target_start + count) * channels]
						.copy_from_slice(&line[child_start * channels..(child_start + count) * channels]);
				}
				Some(mask) => {
					let mut mask_line = vec![0u8; mask.meta().line_len()];
					mask.read_line_u8(child_line as u32, &mut mask_line)?;
					for i in 0..count {
						if mask_line[child_start + i] != 0 {
							let src = (child_start + i) * channels;
							let dst = (target_start + i) * channels;
							buffer[dst..dst + channels].copy_from_slice(&line[src..src + channels]);
						}
					}
				}
			}
		}
		Ok(())
	}
}

impl ImageNode for ExtendedCompoundImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		Some(&self.mask)
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		let fill: Vec<u8> = if self.meta.sample_format().is_float() {
			let mut tmp = vec![0u8; self.nodata.len()];
			samples::f32_to_u8(&self.nodata, &mut tmp);
			tmp
		} else {
			self.nodata.iter().map(|v| v.clamp(0.0, 255.0) as u8).collect()
		};
		self.read_line_generic(y, buffer, &fill, |child, line, buf| child.read_line_u8(line, buf))
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		// nodata is kept in native units; integer formats are read through
		// the 0..1 mapping, so the fill must follow it
		let scale = match self.meta.sample_format() {
			SampleFormat::Float32 => 1.0,
			SampleFormat::Uint8 => 1.0 / 255.0,
			SampleFormat::Uint16 => 1.0 / 65535.0,
		};
		let fill: Vec<f32> = self.nodata.iter().map(|v| v * scale).collect();
		self.read_line_generic(y, buffer, &fill, |child, line, buf| child.read_line_f32(line, buf))
	}
}

/// OR of the child masks of an extended compound, restricted to its bbox.
/// A child without a mask counts as fully opaque over its footprint.
pub struct ExtendedCompoundMask {
	meta: ImageMeta,
	children: Vec<SharedImage>,
	placements: Vec<Placement>,
}

impl ImageNode for ExtendedCompoundMask {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		check_line(&self.meta, y, buffer.len())?;
		buffer[..self.meta.line_len()].fill(0);

		for (child, placement) in self.children.iter().zip(&self.placements) {
			let child_line = i64::from(y) - placement.row_offset;
			if child_line < 0 || child_line >= i64::from(child.meta().height()) {
				continue;
			}
			let target_start = placement.col_offset.max(0);
			let target_end = (placement.col_offset + i64::from(child.meta().width())).min(i64::from(self.meta.width()));
			if target_start >= target_end {
				continue;
			}
			let child_start = (target_start - placement.col_offset) as usize;
			let count = (target_end - target_start) as usize;
			let target_start = target_start as usize;

			match child.mask() {
				None => buffer[target_start..target_start + count].fill(255),
				Some(mask) => {
					let mut mask_line = vec![0u8; mask.meta().line_len()];
					mask.read_line_u8(child_line as u32, &mut mask_line)?;
					for i in 0..count {
						if mask_line[child_start + i] != 0 {
							buffer[target_start + i] = mask_line[child_start + i];
						}
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
	use rok4_core::crs::Crs;
	use std::sync::Arc;

	fn meta(xmin: f64, ymin: f64, xmax: f64, ymax: f64, size: u32) -> ImageMeta {
		ImageMeta::new(
			size,
			size,
			1,
			SampleFormat::Uint8,
			BBox::new(xmin, ymin, xmax, ymax).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap()
	}

	#[test]
	fn compound_concatenates() {
		let children: Vec<SharedImage> = vec![
			Arc::new(EmptyImage::new(meta(0.0, 4.0, 4.0, 8.0, 4), vec![1.0])),
			Arc::new(EmptyImage::new(meta(4.0, 4.0, 8.0, 8.0, 4), vec![2.0])),
			Arc::new(EmptyImage::new(meta(0.0, 0.0, 4.0, 4.0, 4), vec![3.0])),
			Arc::new(EmptyImage::new(meta(4.0, 0.0, 8.0, 4.0, 4), vec![4.0])),
		];
		let compound = CompoundImage::new(children, 2).unwrap();
		assert_eq!(compound.meta().width(), 8);
		assert_eq!(compound.meta().height(), 8);
		assert_eq!(*compound.meta().bbox(), BBox::new(0.0, 0.0, 8.0, 8.0).unwrap());

		let mut line = vec![0u8; 8];
		compound.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![1, 1, 1, 1, 2, 2, 2, 2]);
		compound.read_line_u8(5, &mut line).unwrap();
		assert_eq!(line, vec![3, 3, 3, 3, 4, 4, 4, 4]);
	}

	#[test]
	fn compound_refuses_ragged_grids() {
		let children: Vec<SharedImage> = vec![
			Arc::new(EmptyImage::new(meta(0.0, 4.0, 4.0, 8.0, 4), vec![1.0])),
			Arc::new(EmptyImage::new(meta(4.0, 4.0, 8.0, 8.0, 4), vec![2.0])),
			Arc::new(EmptyImage::new(meta(0.0, 0.0, 4.0, 4.0, 4), vec![3.0])),
		];
		assert!(CompoundImage::new(children, 2).is_err());
	}

	#[test]
	fn extended_compound_fills_nodata_and_overlays() {
		let target = meta(0.0, 0.0, 8.0, 8.0, 8);
		// one 4x4 child in the north-west corner
		let child: SharedImage = Arc::new(EmptyImage::new(meta(0.0, 4.0, 4.0, 8.0, 4), vec![9.0]));
		let compound = ExtendedCompoundImage::new(target, vec![child], vec![255.0]).unwrap();

		let mut line = vec![0u8; 8];
		compound.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![9, 9, 9, 9, 255, 255, 255, 255]);
		compound.read_line_u8(7, &mut line).unwrap();
		assert_eq!(line, vec![255; 8]);

		// the mask follows the footprint
		let mask = compound.mask().unwrap();
		let mut mask_line = vec![0u8; 8];
		mask.read_line_u8(0, &mut mask_line).unwrap();
		assert_eq!(mask_line, vec![255, 255, 255, 255, 0, 0, 0, 0]);
	}

	#[test]
	fn later_children_win() {
		let target = meta(0.0, 0.0, 8.0, 8.0, 8);
		let back: SharedImage = Arc::new(EmptyImage::new(meta(0.0, 0.0, 8.0, 8.0, 8), vec![1.0]));
		let front: SharedImage = Arc::new(EmptyImage::new(meta(0.0, 4.0, 4.0, 8.0, 4), vec![2.0]));
		let compound = ExtendedCompoundImage::new(target, vec![back, front], vec![0.0]).unwrap();

		let mut line = vec![0u8; 8];
		compound.read_line_u8(0, &mut line).unwrap();
		assert_eq!(line, vec![2, 2, 2, 2, 1, 1, 1, 1]);
	}

	#[test]
	fn incompatible_child_is_refused() {
		let target = meta(0.0, 0.0, 8.0, 8.0, 8);
		let shifted = ImageMeta::new(
			4,
			4,
			1,
			SampleFormat::Uint8,
			BBox::new(0.5, 0.5, 4.5, 4.5).unwrap(),
			Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let child: SharedImage = Arc::new(EmptyImage::new(shifted, vec![0.0]));
		assert!(ExtendedCompoundImage::new(target, vec![child], vec![0.0]).is_err());
	}
}
