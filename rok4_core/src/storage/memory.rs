//! In-memory storage, for tests and transient pipelines.

use super::StorageContext;
use crate::types::{Blob, ByteRange};
use anyhow::{Result, anyhow, ensure};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug)]
pub struct MemoryContext {
	name: String,
	blobs: Mutex<HashMap<String, Blob>>,
}

impl MemoryContext {
	pub fn new(name: &str) -> MemoryContext {
		MemoryContext {
			name: name.to_string(),
			blobs: Mutex::new(HashMap::new()),
		}
	}
}

impl StorageContext for MemoryContext {
	fn container(&self) -> &str {
		&self.name
	}

	fn read(&self, key: &str) -> Result<Blob> {
		self
			.blobs
			.lock()
			.unwrap()
			.get(key)
			.cloned()
			.ok_or_else(|| anyhow!("no blob '{key}' in container '{}'", self.name))
	}

	fn read_range(&self, key: &str, range: &ByteRange) -> Result<Blob> {
		let blob = self.read(key)?;
		Ok(Blob::from(blob.read_range(range)?))
	}

	fn write(&self, key: &str, data: &Blob) -> Result<()> {
		self.blobs.lock().unwrap().insert(key.to_string(), data.clone());
		Ok(())
	}

	fn exists(&self, key: &str) -> bool {
		self.blobs.lock().unwrap().contains_key(key)
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.blobs.lock().unwrap().remove(key);
		Ok(())
	}

	fn create_exclusive(&self, key: &str) -> Result<bool> {
		let mut blobs = self.blobs.lock().unwrap();
		if blobs.contains_key(key) {
			return Ok(false);
		}
		blobs.insert(key.to_string(), Blob::new_empty());
		Ok(true)
	}
}
