//! Coordinate reference systems and the reprojection seam.
//!
//! A [`Crs`] is an opaque identifier (`"EPSG:3857"`) plus the bbox of its
//! definition area, expressed in its own units. Coordinate conversion itself
//! is delegated to a [`Reprojector`]: a pure function from points in one CRS
//! to points in another. The built-in [`SphericalMercator`] implementation
//! covers the identity case and the `EPSG:4326 ↔ EPSG:3857` pair with the
//! spherical closed forms; anything else has to be wired in by the embedder.

use crate::types::BBox;
use anyhow::{Result, bail};
use std::f64::consts::PI;
use std::fmt::Display;

const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, PartialEq)]
pub struct Crs {
	id: String,
	definition_area: BBox,
	/// True for geographic CRSs whose WMS 1.3.0 axis order is lat,lon.
	latlon_order: bool,
}

impl Crs {
	pub fn new(id: &str, definition_area: BBox) -> Crs {
		Crs {
			id: id.to_uppercase(),
			definition_area,
			latlon_order: false,
		}
	}

	/// Builds one of the two CRSs known natively, or an opaque CRS with an
	/// unbounded definition area for identifiers the embedder handles itself.
	pub fn from_id(id: &str) -> Crs {
		match id.to_uppercase().as_str() {
			"EPSG:4326" | "CRS:84" => Crs {
				id: id.to_uppercase(),
				definition_area: BBox {
					xmin: -180.0,
					ymin: -MAX_MERCATOR_LAT,
					xmax: 180.0,
					ymax: MAX_MERCATOR_LAT,
				},
				latlon_order: id.to_uppercase() == "EPSG:4326",
			},
			"EPSG:3857" | "EPSG:900913" => {
				let max = EARTH_RADIUS * PI;
				Crs {
					id: "EPSG:3857".to_string(),
					definition_area: BBox {
						xmin: -max,
						ymin: -max,
						xmax: max,
						ymax: max,
					},
					latlon_order: false,
				}
			}
			other => Crs {
				id: other.to_string(),
				definition_area: BBox {
					xmin: f64::MIN / 4.0,
					ymin: f64::MIN / 4.0,
					xmax: f64::MAX / 4.0,
					ymax: f64::MAX / 4.0,
				},
				latlon_order: false,
			},
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn definition_area(&self) -> &BBox {
		&self.definition_area
	}

	/// WMS 1.3.0 swaps the bbox axis order for lat/lon geographic CRSs.
	pub fn is_latlon_order(&self) -> bool {
		self.latlon_order
	}
}

impl Display for Crs {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.id)
	}
}

impl PartialEq<str> for Crs {
	fn eq(&self, other: &str) -> bool {
		self.id.eq_ignore_ascii_case(other)
	}
}

/// Pure-function coordinate conversion between two CRSs.
///
/// Implementations must be deterministic and side-effect free; a failed
/// point conversion (outside the source definition area) is reported per
/// point as `None` so callers can substitute nodata.
pub trait Reprojector: Send + Sync {
	/// True when this reprojector can convert `from` → `to`.
	fn handles(&self, from: &Crs, to: &Crs) -> bool;

	/// Converts one point; `None` when the point has no image in `to`.
	fn reproject_point(&self, x: f64, y: f64, from: &Crs, to: &Crs) -> Option<(f64, f64)>;

	/// Converts a bbox by projecting its corners and edge midpoints and
	/// taking the envelope. Fails when no point converts.
	fn reproject_bbox(&self, bbox: &BBox, from: &Crs, to: &Crs) -> Result<BBox> {
		if from.id() == to.id() {
			return Ok(*bbox);
		}
		let xs = [bbox.xmin, (bbox.xmin + bbox.xmax) / 2.0, bbox.xmax];
		let ys = [bbox.ymin, (bbox.ymin + bbox.ymax) / 2.0, bbox.ymax];
		let mut out: Option<BBox> = None;
		for &x in &xs {
			for &y in &ys {
				if let Some((px, py)) = self.reproject_point(x, y, from, to) {
					out = Some(match out {
						None => BBox {
							xmin: px,
							ymin: py,
							xmax: px,
							ymax: py,
						},
						Some(b) => BBox {
							xmin: b.xmin.min(px),
							ymin: b.ymin.min(py),
							xmax: b.xmax.max(px),
							ymax: b.ymax.max(py),
						},
					});
				}
			}
		}
		match out {
			Some(b) => Ok(b),
			None => bail!("bbox {bbox:?} has no image in {to} (from {from})"),
		}
	}
}

/// Built-in reprojector: identity plus `EPSG:4326 ↔ EPSG:3857`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SphericalMercator;

impl SphericalMercator {
	fn lonlat_to_mercator(lon: f64, lat: f64) -> Option<(f64, f64)> {
		if !(-180.0..=180.0).contains(&lon) || lat.abs() > MAX_MERCATOR_LAT {
			return None;
		}
		let x = EARTH_RADIUS * lon.to_radians();
		let y = EARTH_RADIUS * ((PI / 4.0) + (lat.to_radians() / 2.0)).tan().ln();
		Some((x, y))
	}

	fn mercator_to_lonlat(x: f64, y: f64) -> Option<(f64, f64)> {
		let max = EARTH_RADIUS * PI;
		if x.abs() > max * 1.000001 {
			return None;
		}
		let lon = (x / EARTH_RADIUS).to_degrees();
		let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
		Some((lon, lat))
	}
}

impl Reprojector for SphericalMercator {
	fn handles(&self, from: &Crs, to: &Crs) -> bool {
		if from.id() == to.id() {
			return true;
		}
		let geographic = |crs: &Crs| crs == "EPSG:4326" || crs == "CRS:84";
		let mercator = |crs: &Crs| crs == "EPSG:3857";
		(geographic(from) && mercator(to)) || (mercator(from) && geographic(to))
	}

	fn reproject_point(&self, x: f64, y: f64, from: &Crs, to: &Crs) -> Option<(f64, f64)> {
		if from.id() == to.id() {
			return Some((x, y));
		}
		if from == "EPSG:3857" {
			Self::mercator_to_lonlat(x, y)
		} else {
			Self::lonlat_to_mercator(x, y)
		}
	}
}
