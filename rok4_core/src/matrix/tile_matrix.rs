//! One resolution layer of a tile matrix set.
//!
//! The origin `(x0, y0)` is the **top-left** corner of the matrix: columns
//! grow eastward, rows grow southward. A tile index therefore maps to the
//! bbox `xmin = x0 + col·tileW·resX`, `ymax = y0 − row·tileH·resY`.

use crate::types::BBox;
use anyhow::{Result, ensure};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TileMatrix {
	pub id: String,
	pub scale_denominator: f64,
	pub res_x: f64,
	pub res_y: f64,
	pub x0: f64,
	pub y0: f64,
	pub tile_width: u32,
	pub tile_height: u32,
	pub matrix_width: u32,
	pub matrix_height: u32,
}

impl TileMatrix {
	pub fn validate(&self) -> Result<()> {
		ensure!(self.res_x > 0.0, "tile matrix '{}': res_x must be > 0", self.id);
		ensure!(self.res_y > 0.0, "tile matrix '{}': res_y must be > 0", self.id);
		ensure!(self.tile_width > 0, "tile matrix '{}': tile_width must be > 0", self.id);
		ensure!(self.tile_height > 0, "tile matrix '{}': tile_height must be > 0", self.id);
		Ok(())
	}

	/// Isotropic resolution used by level selection.
	pub fn resolution(&self) -> f64 {
		(self.res_x * self.res_y).sqrt()
	}

	/// Bbox covered by the tile at `(col, row)`.
	pub fn tile_bbox(&self, col: u32, row: u32) -> BBox {
		let xmin = self.x0 + f64::from(col) * f64::from(self.tile_width) * self.res_x;
		let ymax = self.y0 - f64::from(row) * f64::from(self.tile_height) * self.res_y;
		BBox {
			xmin,
			ymin: ymax - f64::from(self.tile_height) * self.res_y,
			xmax: xmin + f64::from(self.tile_width) * self.res_x,
			ymax,
		}
	}

	/// Inclusive (col, row) ranges of the tiles intersecting `bbox`,
	/// clamped to the matrix extent.
	pub fn tile_indices(&self, bbox: &BBox) -> (u32, u32, u32, u32) {
		let tile_w = f64::from(self.tile_width) * self.res_x;
		let tile_h = f64::from(self.tile_height) * self.res_y;
		let col_min = ((bbox.xmin - self.x0) / tile_w).floor().max(0.0) as u32;
		let col_max = (((bbox.xmax - self.x0) / tile_w).ceil() - 1.0).max(0.0) as u32;
		let row_min = ((self.y0 - bbox.ymax) / tile_h).floor().max(0.0) as u32;
		let row_max = (((self.y0 - bbox.ymin) / tile_h).ceil() - 1.0).max(0.0) as u32;
		(
			col_min.min(self.matrix_width - 1),
			row_min.min(self.matrix_height - 1),
			col_max.min(self.matrix_width - 1),
			row_max.min(self.matrix_height - 1),
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn matrix() -> TileMatrix {
		TileMatrix {
			id: "10".to_string(),
			scale_denominator: 545978.7734,
			res_x: 152.8740565703525,
			res_y: 152.8740565703525,
			x0: -20037508.3427892,
			y0: 20037508.3427892,
			tile_width: 256,
			tile_height: 256,
			matrix_width: 1024,
			matrix_height: 1024,
		}
	}

	#[test]
	fn tile_bbox_geometry() {
		let tm = matrix();
		let bbox = tm.tile_bbox(0, 0);
		assert_eq!(bbox.xmin, tm.x0);
		assert_eq!(bbox.ymax, tm.y0);
		assert!((bbox.width() - 256.0 * tm.res_x).abs() < 1e-6);
	}

	#[test]
	fn indices_invert_bbox() {
		let tm = matrix();
		let bbox = tm.tile_bbox(512, 356);
		let (c0, r0, c1, r1) = tm.tile_indices(&bbox);
		assert_eq!((c0, r0), (512, 356));
		assert_eq!((c1, r1), (512, 356));
	}

	#[test]
	fn indices_clamped_to_matrix() {
		let tm = matrix();
		let everything = BBox::new(-1e9, -1e9, 1e9, 1e9).unwrap();
		let (c0, r0, c1, r1) = tm.tile_indices(&everything);
		assert_eq!((c0, r0), (0, 0));
		assert_eq!((c1, r1), (1023, 1023));
	}
}
