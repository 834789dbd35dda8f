use crate::types::{Blob, ByteRange};
use anyhow::Result;
use std::fmt::Debug;

/// Read/write access to blobs of one container.
///
/// Implementations must be safe to share across serving threads. Partial
/// reads ([`read_range`](Self::read_range)) let the slab reader fetch a tile
/// without pulling the whole slab.
pub trait StorageContext: Debug + Send + Sync {
	/// Container identifier, for logging.
	fn container(&self) -> &str;

	fn read(&self, key: &str) -> Result<Blob>;

	fn read_range(&self, key: &str, range: &ByteRange) -> Result<Blob>;

	fn write(&self, key: &str, data: &Blob) -> Result<()>;

	fn exists(&self, key: &str) -> bool;

	fn remove(&self, key: &str) -> Result<()>;

	/// Atomically creates an empty blob under `key`.
	///
	/// Returns `true` when this call created it, `false` when it already
	/// existed. Exactly one concurrent caller observes `true`; the on-the-fly
	/// generator relies on this for its `.tmp` sentinels.
	fn create_exclusive(&self, key: &str) -> Result<bool>;
}
