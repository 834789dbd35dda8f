//! Ordered set of tile matrices in a single CRS.
//!
//! Loaded from a JSON descriptor file. Matrices are kept sorted from
//! coarsest to finest resolution whatever the file order.

use super::TileMatrix;
use crate::crs::Crs;
use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct TileMatrixSet {
	id: String,
	crs: Crs,
	/// Coarsest first.
	matrices: Vec<TileMatrix>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TileMatrixSetFile {
	id: String,
	crs: String,
	matrices: Vec<TileMatrix>,
}

impl TileMatrixSet {
	pub fn new(id: &str, crs: Crs, mut matrices: Vec<TileMatrix>) -> Result<TileMatrixSet> {
		ensure!(!matrices.is_empty(), "tile matrix set '{id}' has no matrices");
		for tm in &matrices {
			tm.validate()?;
		}
		matrices.sort_by(|a, b| b.resolution().total_cmp(&a.resolution()));
		Ok(TileMatrixSet {
			id: id.to_string(),
			crs,
			matrices,
		})
	}

	pub fn from_json(json: &str) -> Result<TileMatrixSet> {
		let file: TileMatrixSetFile = serde_json::from_str(json).context("parsing tile matrix set descriptor")?;
		TileMatrixSet::new(&file.id, Crs::from_id(&file.crs), file.matrices)
	}

	pub fn from_path(path: &Path) -> Result<TileMatrixSet> {
		let json = std::fs::read_to_string(path).with_context(|| format!("reading tile matrix set {path:?}"))?;
		TileMatrixSet::from_json(&json)
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	pub fn matrix(&self, id: &str) -> Option<&TileMatrix> {
		self.matrices.iter().find(|tm| tm.id == id)
	}

	/// Coarsest → finest.
	pub fn matrices(&self) -> &[TileMatrix] {
		&self.matrices
	}
}
