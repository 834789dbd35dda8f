//! Axis-aligned bounding box in a projected coordinate system.
//!
//! A [`BBox`] is the geometry currency of the whole pipeline: requests carry
//! one, every image node exposes one, and reprojection / phase alignment are
//! expressed as operations on it. Coordinates are stored as `f64` in the
//! units of whatever CRS the box currently lives in; the box itself does not
//! remember its CRS (the owning image or request does).

use anyhow::{Result, ensure};
use std::fmt::Debug;

#[derive(Clone, Copy, PartialEq)]
pub struct BBox {
	pub xmin: f64,
	pub ymin: f64,
	pub xmax: f64,
	pub ymax: f64,
}

impl BBox {
	pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<BBox> {
		ensure!(xmin <= xmax, "xmin ({xmin}) must be <= xmax ({xmax})");
		ensure!(ymin <= ymax, "ymin ({ymin}) must be <= ymax ({ymax})");
		Ok(BBox { xmin, ymin, xmax, ymax })
	}

	/// A box that contains nothing and intersects nothing.
	pub fn empty() -> BBox {
		BBox {
			xmin: 0.0,
			ymin: 0.0,
			xmax: 0.0,
			ymax: 0.0,
		}
	}

	pub fn width(&self) -> f64 {
		self.xmax - self.xmin
	}

	pub fn height(&self) -> f64 {
		self.ymax - self.ymin
	}

	pub fn is_null(&self) -> bool {
		self.width() <= 0.0 || self.height() <= 0.0
	}

	/// True when the two boxes share at least one interior point.
	pub fn intersects(&self, other: &BBox) -> bool {
		self.xmin < other.xmax && self.xmax > other.xmin && self.ymin < other.ymax && self.ymax > other.ymin
	}

	/// True when `other` lies entirely inside `self` (borders included).
	pub fn contains_inside(&self, other: &BBox) -> bool {
		other.xmin >= self.xmin && other.xmax <= self.xmax && other.ymin >= self.ymin && other.ymax <= self.ymax
	}

	/// Shrinks `self` to the intersection with `other`. The result may be null.
	pub fn cut_intersection_with(&mut self, other: &BBox) {
		if !self.intersects(other) {
			*self = BBox::empty();
			return;
		}
		self.xmin = self.xmin.max(other.xmin);
		self.ymin = self.ymin.max(other.ymin);
		self.xmax = self.xmax.min(other.xmax);
		self.ymax = self.ymax.min(other.ymax);
	}

	/// Clamps `self` to a CRS definition area (same operation as
	/// [`cut_intersection_with`](Self::cut_intersection_with) but keeps a null
	/// box null instead of resetting coordinates).
	pub fn crop_to(&mut self, area: &BBox) {
		self.cut_intersection_with(area);
	}

	/// Grows the box by `n` steps of `dx` / `dy` on every side.
	pub fn expand(&mut self, dx: f64, dy: f64, n: usize) {
		let n = n as f64;
		self.xmin -= dx * n;
		self.xmax += dx * n;
		self.ymin -= dy * n;
		self.ymax += dy * n;
	}

	/// Aligns the box outward onto the pixel grid defined by `other`'s origin
	/// and the resolutions `res_x` / `res_y`: the returned box has the same
	/// phase as `other` and contains `self`.
	pub fn adapt_to(&self, other: &BBox, res_x: f64, res_y: f64) -> BBox {
		let xmin = other.xmin + ((self.xmin - other.xmin) / res_x).floor() * res_x;
		let xmax = other.xmin + ((self.xmax - other.xmin) / res_x).ceil() * res_x;
		let ymin = other.ymin + ((self.ymin - other.ymin) / res_y).floor() * res_y;
		let ymax = other.ymin + ((self.ymax - other.ymin) / res_y).ceil() * res_y;
		BBox { xmin, ymin, xmax, ymax }
	}

	/// Fractional position of the box origin on a grid of the given
	/// resolutions, in `[0,1)`. Two boxes on the same grid share phases.
	pub fn phase_x(&self, res_x: f64) -> f64 {
		let p = (self.xmin / res_x).fract();
		if p < 0.0 { p + 1.0 } else { p }
	}

	pub fn phase_y(&self, res_y: f64) -> f64 {
		let p = (self.ymin / res_y).fract();
		if p < 0.0 { p + 1.0 } else { p }
	}

	pub fn as_array(&self) -> [f64; 4] {
		[self.xmin, self.ymin, self.xmax, self.ymax]
	}
}

impl Debug for BBox {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "BBox[{}, {}, {}, {}]", self.xmin, self.ymin, self.xmax, self.ymax)
	}
}
