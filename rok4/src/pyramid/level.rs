//! One resolution level of a pyramid.
//!
//! A level maps its tile matrix onto storage: tiles are grouped into slabs
//! of `slab_tiles_w × slab_tiles_h`, named `<level>/<slabcol>_<slabrow>.tif`
//! under the level's storage context. Slab readers (and their decoded-tile
//! memoization) are opened once and kept for the lifetime of the pyramid.

use crate::ondemand::WebService;
use crate::pyramid::Pyramid;
use anyhow::{Context, Result, ensure};
use rok4_container::{NodataTile, SlabReader, TileImage, DEFAULT_MEMORY_SIZE};
use rok4_core::crs::Crs;
use rok4_core::format::{Compression, SampleFormat};
use rok4_core::matrix::TileMatrix;
use rok4_core::storage::StorageContext;
use rok4_core::types::Blob;
use rok4_image::{ImageMeta, MergeMethod};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
	Stored,
	OnDemand,
	OnFly,
}

/// An upstream producer feeding an on-demand or on-the-fly level, back to
/// front.
#[derive(Clone)]
pub enum Source {
	Pyramid(Arc<Pyramid>),
	Wms(Arc<WebService>),
}

pub struct Level {
	id: String,
	matrix: TileMatrix,
	crs: Crs,
	channels: u16,
	sample_format: SampleFormat,
	compression: Compression,
	min_col: u32,
	max_col: u32,
	min_row: u32,
	max_row: u32,
	slab_tiles_w: u32,
	slab_tiles_h: u32,
	context: Arc<dyn StorageContext>,
	mode: GenerationMode,
	sources: Vec<Source>,
	merge_method: MergeMethod,
	nodata_tile: NodataTile,
	readers: Mutex<HashMap<u64, Arc<SlabReader>>>,
}

#[allow(clippy::too_many_arguments)]
impl Level {
	pub fn new(
		id: &str,
		matrix: TileMatrix,
		crs: Crs,
		channels: u16,
		sample_format: SampleFormat,
		compression: Compression,
		tile_range: (u32, u32, u32, u32),
		slab_tiles: (u32, u32),
		context: Arc<dyn StorageContext>,
		mode: GenerationMode,
		sources: Vec<Source>,
		merge_method: MergeMethod,
	) -> Result<Level> {
		let (min_col, min_row, max_col, max_row) = tile_range;
		ensure!(min_col <= max_col && min_row <= max_row, "level '{id}': empty tile range");
		ensure!(
			slab_tiles.0 > 0 && slab_tiles.1 > 0,
			"level '{id}': slabs must hold at least one tile"
		);
		if matches!(mode, GenerationMode::OnDemand | GenerationMode::OnFly) {
			ensure!(!sources.is_empty(), "level '{id}': generated levels need sources");
		}
		let nodata_tile = NodataTile::new(context.clone(), &format!("{id}/NODATA.tif"));
		Ok(Level {
			id: id.to_string(),
			matrix,
			crs,
			channels,
			sample_format,
			compression,
			min_col,
			max_col,
			min_row,
			max_row,
			slab_tiles_w: slab_tiles.0,
			slab_tiles_h: slab_tiles.1,
			context,
			mode,
			sources,
			merge_method,
			nodata_tile,
			readers: Mutex::new(HashMap::new()),
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn matrix(&self) -> &TileMatrix {
		&self.matrix
	}

	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	pub fn channels(&self) -> u16 {
		self.channels
	}

	pub fn sample_format(&self) -> SampleFormat {
		self.sample_format
	}

	pub fn compression(&self) -> Compression {
		self.compression
	}

	pub fn mode(&self) -> GenerationMode {
		self.mode
	}

	pub fn sources(&self) -> &[Source] {
		&self.sources
	}

	pub fn merge_method(&self) -> MergeMethod {
		self.merge_method
	}

	pub fn context(&self) -> &Arc<dyn StorageContext> {
		&self.context
	}

	pub fn nodata_tile(&self) -> &NodataTile {
		&self.nodata_tile
	}

	/// Isotropic resolution, for level selection.
	pub fn resolution(&self) -> f64 {
		self.matrix.resolution()
	}

	pub fn tile_in_range(&self, col: u32, row: u32) -> bool {
		(self.min_col..=self.max_col).contains(&col) && (self.min_row..=self.max_row).contains(&row)
	}

	/// Storage key of the slab containing tile `(col, row)`.
	pub fn slab_key(&self, col: u32, row: u32) -> String {
		format!("{}/{}_{}.tif", self.id, col / self.slab_tiles_w, row / self.slab_tiles_h)
	}

	/// Pixel geometry of one whole slab, for the on-the-fly generator.
	pub fn slab_meta(&self, col: u32, row: u32) -> Result<ImageMeta> {
		let slab_col = col / self.slab_tiles_w;
		let slab_row = row / self.slab_tiles_h;
		let first = self
			.matrix
			.tile_bbox(slab_col * self.slab_tiles_w, slab_row * self.slab_tiles_h);
		let last = self.matrix.tile_bbox(
			slab_col * self.slab_tiles_w + self.slab_tiles_w - 1,
			slab_row * self.slab_tiles_h + self.slab_tiles_h - 1,
		);
		ImageMeta::new(
			self.matrix.tile_width * self.slab_tiles_w,
			self.matrix.tile_height * self.slab_tiles_h,
			self.channels,
			self.sample_format,
			rok4_core::types::BBox::new(first.xmin, last.ymin, last.xmax, first.ymax)?,
			self.crs.clone(),
		)
	}

	pub fn slab_tiles(&self) -> (u32, u32) {
		(self.slab_tiles_w, self.slab_tiles_h)
	}

	fn reader_for(&self, col: u32, row: u32) -> Result<Arc<SlabReader>> {
		let slab_col = col / self.slab_tiles_w;
		let slab_row = row / self.slab_tiles_h;
		let cache_key = u64::from(slab_col) << 32 | u64::from(slab_row);
		let mut readers = self.readers.lock().unwrap();
		if let Some(reader) = readers.get(&cache_key) {
			return Ok(reader.clone());
		}
		let key = self.slab_key(col, row);
		let reader = Arc::new(
			SlabReader::open(self.context.clone(), &key, DEFAULT_MEMORY_SIZE)
				.with_context(|| format!("opening slab '{key}' of level '{}'", self.id))?,
		);
		readers.insert(cache_key, reader.clone());
		Ok(reader)
	}

	/// Forgets a cached reader, after an on-the-fly generation replaced the
	/// slab underneath it.
	pub fn invalidate_reader(&self, col: u32, row: u32) {
		let cache_key = u64::from(col / self.slab_tiles_w) << 32 | u64::from(row / self.slab_tiles_h);
		self.readers.lock().unwrap().remove(&cache_key);
	}

	/// Encoded bytes of a stored tile, verbatim from the slab.
	pub fn stored_tile(&self, col: u32, row: u32) -> Result<Blob> {
		let reader = self.reader_for(col, row)?;
		let index = reader.tile_index(col % self.slab_tiles_w, row % self.slab_tiles_h)?;
		reader.get_encoded_tile(index)
	}

	/// Decoded stored tile as an image node, georeferenced by the matrix.
	/// `None` when the tile is out of range or its slab does not exist.
	pub fn stored_tile_image(&self, col: u32, row: u32) -> Result<Option<TileImage>> {
		if !self.tile_in_range(col, row) {
			return Ok(None);
		}
		if !self.context.exists(&self.slab_key(col, row)) {
			return Ok(None);
		}
		let reader = self.reader_for(col, row)?;
		let index = reader.tile_index(col % self.slab_tiles_w, row % self.slab_tiles_h)?;
		let mut raw = vec![0u8; reader.header().raw_tile_size()];
		reader.get_raw_tile(index, &mut raw)?;
		let meta = ImageMeta::new(
			self.matrix.tile_width,
			self.matrix.tile_height,
			self.channels,
			self.sample_format,
			self.matrix.tile_bbox(col, row),
			self.crs.clone(),
		)?;
		Ok(Some(TileImage::from_raw(meta, Blob::from(raw))?))
	}
}
