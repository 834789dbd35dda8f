//! A pyramid: ordered levels over one tile matrix set.

use super::level::Level;
use anyhow::{Result, ensure};
use rok4_core::crs::Crs;
use rok4_core::format::{Photometric, PyramidFormat};
use rok4_core::matrix::TileMatrixSet;
use rok4_core::types::BBox;
use rok4_image::{ExtendedCompoundImage, ImageMeta, SharedImage, Style};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Pyramid {
	id: String,
	format: PyramidFormat,
	channels: u16,
	photometric: Photometric,
	/// One native-unit value per channel.
	nodata: Vec<f32>,
	tms: Arc<TileMatrixSet>,
	levels: BTreeMap<String, Arc<Level>>,
	style: Option<Style>,
}

impl Pyramid {
	pub fn new(
		id: &str,
		format: PyramidFormat,
		channels: u16,
		nodata: Vec<f32>,
		tms: Arc<TileMatrixSet>,
		levels: Vec<Level>,
		style: Option<Style>,
	) -> Result<Pyramid> {
		ensure!(!levels.is_empty(), "pyramid '{id}' has no levels");
		let mut nodata = nodata;
		if nodata.is_empty() {
			nodata = vec![format.sample_format.default_nodata() as f32; channels as usize];
		}
		ensure!(
			nodata.len() >= channels as usize,
			"pyramid '{id}': nodata must provide {channels} values"
		);
		let mut map = BTreeMap::new();
		for level in levels {
			ensure!(
				tms.matrix(level.id()).is_some(),
				"pyramid '{id}': level '{}' is not a tile matrix of TMS '{}'",
				level.id(),
				tms.id()
			);
			map.insert(level.id().to_string(), Arc::new(level));
		}
		Ok(Pyramid {
			id: id.to_string(),
			format,
			channels,
			photometric: Photometric::from_channels(channels)?,
			nodata,
			tms,
			levels: map,
			style,
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn format(&self) -> PyramidFormat {
		self.format
	}

	pub fn channels(&self) -> u16 {
		self.channels
	}

	pub fn photometric(&self) -> Photometric {
		self.photometric
	}

	pub fn nodata(&self) -> &[f32] {
		&self.nodata
	}

	pub fn tms(&self) -> &Arc<TileMatrixSet> {
		&self.tms
	}

	pub fn crs(&self) -> &Crs {
		self.tms.crs()
	}

	pub fn style(&self) -> Option<&Style> {
		self.style.as_ref()
	}

	pub fn level(&self, id: &str) -> Option<&Arc<Level>> {
		self.levels.get(id)
	}

	pub fn levels(&self) -> impl Iterator<Item = &Arc<Level>> {
		self.levels.values()
	}

	/// Coarsest level (largest resolution).
	pub fn lowest_level(&self) -> &Arc<Level> {
		self
			.levels
			.values()
			.max_by(|a, b| a.resolution().total_cmp(&b.resolution()))
			.expect("pyramids have at least one level")
	}

	/// Finest level (smallest resolution).
	pub fn highest_level(&self) -> &Arc<Level> {
		self
			.levels
			.values()
			.min_by(|a, b| a.resolution().total_cmp(&b.resolution()))
			.expect("pyramids have at least one level")
	}

	/// Level best matching the requested resolution.
	///
	/// The ratio `requested / level` is preferred inside `[0.8, 1.8]`,
	/// smallest in band (finest detail that still satisfies it); otherwise
	/// the ratio closest to 1 from above wins. On-demand synthesis gives up
	/// (`None`) when no level lands in the band; plain requests always get
	/// the closest level.
	pub fn best_level(&self, resolution: f64, on_demand: bool) -> Option<&Arc<Level>> {
		let mut best: Option<(f64, &Arc<Level>)> = None;
		for level in self.levels.values() {
			let ratio = resolution / level.resolution();
			best = Some(match best {
				None => (ratio, level),
				Some((current, kept)) => {
					if (current < 0.8 && ratio > current) || (current >= 0.8 && ratio >= 0.8 && ratio < current) {
						(ratio, level)
					} else {
						(current, kept)
					}
				}
			});
		}
		let (ratio, level) = best?;
		if on_demand && !(0.8..=1.8).contains(&ratio) {
			return None;
		}
		Some(level)
	}

	/// Mosaic of the stored tiles of `level` covering `bbox` (in the
	/// pyramid's CRS), snapped outward to the tile grid. Missing tiles and
	/// uncovered pixels carry the pyramid nodata; the mosaic mask reflects
	/// what was actually read.
	pub fn mosaic(&self, level: &Level, bbox: &BBox) -> Result<SharedImage> {
		let matrix = level.matrix();
		let (col_min, row_min, col_max, row_max) = matrix.tile_indices(bbox);

		let first = matrix.tile_bbox(col_min, row_min);
		let last = matrix.tile_bbox(col_max, row_max);
		let target = ImageMeta::new(
			(col_max - col_min + 1) * matrix.tile_width,
			(row_max - row_min + 1) * matrix.tile_height,
			self.channels,
			self.format.sample_format,
			BBox::new(first.xmin, last.ymin, last.xmax, first.ymax)?,
			self.crs().clone(),
		)?;

		let mut children: Vec<SharedImage> = Vec::new();
		for row in row_min..=row_max {
			for col in col_min..=col_max {
				match level.stored_tile_image(col, row) {
					Ok(Some(tile)) => children.push(Arc::new(tile)),
					Ok(None) => {}
					Err(error) => {
						// a broken slab behaves like a missing one
						log::warn!("pyramid '{}': unreadable tile ({col}, {row}): {error:#}", self.id);
					}
				}
			}
		}

		if children.is_empty() {
			// whole area is nodata; carry an all-zero mask so overlays can
			// see through it
			let nodata = Arc::new(rok4_image::EmptyImage::new(target.clone(), self.nodata.clone()));
			let mask_meta = ImageMeta::new(
				target.width(),
				target.height(),
				1,
				rok4_core::format::SampleFormat::Uint8,
				*target.bbox(),
				self.crs().clone(),
			)?;
			let mask = Arc::new(rok4_image::EmptyImage::new(mask_meta, vec![0.0]));
			return Ok(Arc::new(rok4_image::MaskedImage::new(nodata, mask)?));
		}

		Ok(Arc::new(ExtendedCompoundImage::new(target, children, self.nodata.clone())?))
	}
}
