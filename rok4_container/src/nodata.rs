//! The canonical nodata tile of a level.
//!
//! Stored as a single-tile slab under `<level>/NODATA.tif` and loaded
//! lazily: the encoded form answers GetTile misses verbatim, the raw form
//! fills mosaics.

use crate::slab::SlabReader;
use anyhow::{Context, Result};
use rok4_core::storage::StorageContext;
use rok4_core::types::Blob;
use std::sync::{Arc, Mutex, OnceLock};

pub struct NodataTile {
	context: Arc<dyn StorageContext>,
	key: String,
	reader: OnceLock<SlabReader>,
	raw: Mutex<Option<Blob>>,
}

impl NodataTile {
	pub fn new(context: Arc<dyn StorageContext>, key: &str) -> NodataTile {
		NodataTile {
			context,
			key: key.to_string(),
			reader: OnceLock::new(),
			raw: Mutex::new(None),
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	fn reader(&self) -> Result<&SlabReader> {
		if let Some(reader) = self.reader.get() {
			return Ok(reader);
		}
		let reader = SlabReader::open(self.context.clone(), &self.key, 1)
			.with_context(|| format!("loading nodata tile '{}'", self.key))?;
		Ok(self.reader.get_or_init(|| reader))
	}

	/// Encoded bytes, as served for out-of-coverage GetTile requests.
	pub fn encoded(&self) -> Result<Blob> {
		self.reader()?.get_encoded_tile(0)
	}

	/// Decoded samples.
	pub fn raw(&self) -> Result<Blob> {
		let mut cached = self.raw.lock().unwrap();
		if let Some(blob) = cached.as_ref() {
			return Ok(blob.clone());
		}
		let reader = self.reader()?;
		let mut buffer = vec![0u8; reader.header().raw_tile_size()];
		reader.get_raw_tile(0, &mut buffer)?;
		let blob = Blob::from(buffer);
		*cached = Some(blob.clone());
		Ok(blob)
	}
}
