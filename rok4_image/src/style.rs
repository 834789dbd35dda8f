//! Styles: an optional analytic stage followed by an optional palette.
//!
//! A pyramid style turns raw single-channel data (typically elevation) into
//! a displayable raster: hillshade / slope / aspect derivation, then color
//! lookup. Both stages are optional but a style with neither is pointless
//! and refused at load time.

use crate::aspect::{AspectImage, AspectParams};
use crate::hillshade::{HillshadeImage, HillshadeParams};
use crate::slope::{SlopeImage, SlopeParams, SlopeUnit};
use crate::styled::StyledImage;
use crate::traits::SharedImage;
use anyhow::{Result, ensure};
use serde::Deserialize;
use std::sync::Arc;

/// Sorted numeric breakpoints mapped to RGBA, linearly interpolated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Palette {
	entries: Vec<PaletteEntry>,
	/// Emit RGB instead of RGBA.
	#[serde(default)]
	pub no_alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PaletteEntry {
	pub value: f64,
	pub color: [u8; 4],
}

impl Palette {
	pub fn new(mut entries: Vec<PaletteEntry>, no_alpha: bool) -> Result<Palette> {
		ensure!(!entries.is_empty(), "a palette needs at least one entry");
		entries.sort_by(|a, b| a.value.total_cmp(&b.value));
		Ok(Palette { entries, no_alpha })
	}

	/// Validates a deserialized palette (sorting included).
	pub fn validated(mut self) -> Result<Palette> {
		ensure!(!self.entries.is_empty(), "a palette needs at least one entry");
		self.entries.sort_by(|a, b| a.value.total_cmp(&b.value));
		Ok(self)
	}

	pub fn out_channels(&self) -> u16 {
		if self.no_alpha { 3 } else { 4 }
	}

	/// RGBA for `value`: clamped outside the breakpoints, linearly
	/// interpolated between them.
	pub fn lookup(&self, value: f64) -> [u8; 4] {
		let entries = &self.entries;
		if value <= entries[0].value {
			return entries[0].color;
		}
		if value >= entries[entries.len() - 1].value {
			return entries[entries.len() - 1].color;
		}
		let upper = entries.partition_point(|e| e.value < value);
		let (low, high) = (&entries[upper - 1], &entries[upper]);
		let t = (value - low.value) / (high.value - low.value);
		let mut color = [0u8; 4];
		for c in 0..4 {
			color[c] = (f64::from(low.color[c]) + t * (f64::from(high.color[c]) - f64::from(low.color[c]))).round() as u8;
		}
		color
	}
}

/// Analytic derivation applied before the palette.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalyticStage {
	Hillshade {
		#[serde(default = "default_azimuth")]
		azimuth: f64,
		#[serde(default = "default_zenith")]
		zenith: f64,
		#[serde(default = "default_exaggeration")]
		exaggeration: f32,
		#[serde(default)]
		center: u8,
	},
	Slope {
		#[serde(default = "default_meter")]
		res_x_meter: f64,
		#[serde(default = "default_meter")]
		res_y_meter: f64,
		#[serde(default)]
		percent: bool,
		#[serde(default)]
		min_slope: f64,
		#[serde(default = "default_max_slope")]
		max_slope: f64,
		#[serde(default)]
		nodata: u8,
	},
	Aspect {
		#[serde(default = "default_meter")]
		res_x_meter: f64,
		#[serde(default = "default_meter")]
		res_y_meter: f64,
		#[serde(default)]
		min_slope: f64,
	},
}

fn default_azimuth() -> f64 {
	315.0
}
fn default_zenith() -> f64 {
	45.0
}
fn default_exaggeration() -> f32 {
	1.0
}
fn default_meter() -> f64 {
	1.0
}
fn default_max_slope() -> f64 {
	90.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Style {
	pub id: String,
	#[serde(default)]
	pub analytic: Option<AnalyticStage>,
	#[serde(default)]
	pub palette: Option<Palette>,
}

impl Style {
	pub fn validate(&self) -> Result<()> {
		ensure!(
			self.analytic.is_some() || self.palette.is_some(),
			"style '{}' has neither an analytic stage nor a palette",
			self.id
		);
		if let Some(palette) = &self.palette {
			ensure!(!palette.entries.is_empty(), "style '{}' has an empty palette", self.id);
		}
		Ok(())
	}

	/// Number of channels this style produces from a single-channel source.
	pub fn out_channels(&self) -> u16 {
		match &self.palette {
			Some(palette) => palette.out_channels(),
			None => 1,
		}
	}

	/// Wraps `source` with the style's stages.
	pub fn apply(&self, source: SharedImage) -> Result<SharedImage> {
		let mut image = source;
		match &self.analytic {
			None => {}
			Some(AnalyticStage::Hillshade {
				azimuth,
				zenith,
				exaggeration,
				center,
			}) => {
				image = Arc::new(HillshadeImage::new(image, HillshadeParams {
					azimuth: *azimuth,
					zenith: *zenith,
					exaggeration: *exaggeration,
					center: *center,
				})?);
			}
			Some(AnalyticStage::Slope {
				res_x_meter,
				res_y_meter,
				percent,
				min_slope,
				max_slope,
				nodata,
			}) => {
				image = Arc::new(SlopeImage::new(image, SlopeParams {
					res_x_meter: *res_x_meter,
					res_y_meter: *res_y_meter,
					unit: if *percent { SlopeUnit::Percent } else { SlopeUnit::Degree },
					min_slope: *min_slope,
					max_slope: *max_slope,
					nodata: *nodata,
				})?);
			}
			Some(AnalyticStage::Aspect {
				res_x_meter,
				res_y_meter,
				min_slope,
			}) => {
				image = Arc::new(AspectImage::new(image, AspectParams {
					res_x_meter: *res_x_meter,
					res_y_meter: *res_y_meter,
					min_slope: *min_slope,
				})?);
			}
		}
		if let Some(palette) = &self.palette {
			// a deserialized palette may arrive unsorted
			image = Arc::new(StyledImage::new(image, palette.clone().validated()?)?);
		}
		Ok(image)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn palette() -> Palette {
		Palette::new(
			vec![
				PaletteEntry {
					value: 0.0,
					color: [0, 0, 0, 255],
				},
				PaletteEntry {
					value: 100.0,
					color: [200, 100, 0, 255],
				},
			],
			false,
		)
		.unwrap()
	}

	#[test]
	fn lookup_clamps_outside() {
		let p = palette();
		assert_eq!(p.lookup(-50.0), [0, 0, 0, 255]);
		assert_eq!(p.lookup(1e9), [200, 100, 0, 255]);
	}

	#[test]
	fn lookup_interpolates() {
		let p = palette();
		assert_eq!(p.lookup(50.0), [100, 50, 0, 255]);
		assert_eq!(p.lookup(25.0), [50, 25, 0, 255]);
	}

	#[test]
	fn entries_are_sorted_on_build() {
		let p = Palette::new(
			vec![
				PaletteEntry {
					value: 10.0,
					color: [10, 0, 0, 255],
				},
				PaletteEntry {
					value: -10.0,
					color: [0, 0, 0, 0],
				},
			],
			true,
		)
		.unwrap();
		assert_eq!(p.lookup(-20.0), [0, 0, 0, 0]);
		assert_eq!(p.out_channels(), 3);
	}

	#[test]
	fn style_needs_a_stage() {
		let style = Style {
			id: "void".to_string(),
			analytic: None,
			palette: None,
		};
		assert!(style.validate().is_err());
	}

	#[test]
	fn style_parses_from_yaml_like_structure() {
		let json = r#"{
			"id": "hillshade",
			"analytic": {"kind": "hillshade", "azimuth": 315.0, "zenith": 45.0}
		}"#;
		let style: Style = serde_json::from_str(json).unwrap();
		style.validate().unwrap();
		assert!(matches!(style.analytic, Some(AnalyticStage::Hillshade { .. })));
	}
}
