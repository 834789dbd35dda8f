//! Filesystem-backed storage: the container is a root directory, keys are
//! relative paths below it.

use super::StorageContext;
use crate::types::{Blob, ByteRange};
use anyhow::{Context, Result, ensure};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileContext {
	root: PathBuf,
}

impl FileContext {
	pub fn new(root: &Path) -> FileContext {
		FileContext { root: root.to_path_buf() }
	}

	fn path(&self, key: &str) -> PathBuf {
		self.root.join(key)
	}
}

impl StorageContext for FileContext {
	fn container(&self) -> &str {
		self.root.to_str().unwrap_or("<non-utf8 root>")
	}

	fn read(&self, key: &str) -> Result<Blob> {
		let path = self.path(key);
		let data = std::fs::read(&path).with_context(|| format!("reading {path:?}"))?;
		Ok(Blob::from(data))
	}

	fn read_range(&self, key: &str, range: &ByteRange) -> Result<Blob> {
		let path = self.path(key);
		let mut file = File::open(&path).with_context(|| format!("opening {path:?}"))?;
		file.seek(SeekFrom::Start(range.offset))?;
		let mut buffer = vec![0u8; range.length as usize];
		file
			.read_exact(&mut buffer)
			.with_context(|| format!("reading {range:?} of {path:?}"))?;
		Ok(Blob::from(buffer))
	}

	fn write(&self, key: &str, data: &Blob) -> Result<()> {
		let path = self.path(key);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
		}
		std::fs::write(&path, data.as_slice()).with_context(|| format!("writing {path:?}"))
	}

	fn exists(&self, key: &str) -> bool {
		self.path(key).exists()
	}

	fn remove(&self, key: &str) -> Result<()> {
		let path = self.path(key);
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e).with_context(|| format!("removing {path:?}")),
		}
	}

	fn create_exclusive(&self, key: &str) -> Result<bool> {
		let path = self.path(key);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).with_context(|| format!("creating {parent:?}"))?;
		}
		match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(_) => Ok(true),
			Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
			Err(e) => Err(e).with_context(|| format!("creating {path:?} exclusively")),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let ctx = FileContext::new(dir.path());

		assert!(!ctx.exists("level/slab.tif"));
		ctx.write("level/slab.tif", &Blob::from("content"))?;
		assert!(ctx.exists("level/slab.tif"));
		assert_eq!(ctx.read("level/slab.tif")?.as_str(), "content");
		assert_eq!(ctx.read_range("level/slab.tif", &ByteRange::new(3, 4))?.as_str(), "tent");

		ctx.remove("level/slab.tif")?;
		assert!(!ctx.exists("level/slab.tif"));
		ctx.remove("level/slab.tif")?; // idempotent
		Ok(())
	}

	#[test]
	fn exclusive_creation_single_winner() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let ctx = FileContext::new(dir.path());
		assert!(ctx.create_exclusive("slab.tmp")?);
		assert!(!ctx.create_exclusive("slab.tmp")?);
		Ok(())
	}

	#[test]
	fn out_of_range_read_fails() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let ctx = FileContext::new(dir.path());
		ctx.write("x", &Blob::from("ab"))?;
		ensure!(ctx.read_range("x", &ByteRange::new(0, 10)).is_err());
		Ok(())
	}
}
