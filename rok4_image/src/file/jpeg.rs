//! JPEG decoding through the `image` crate.

use super::decode::Decoded;
use super::png::from_dynamic;
use anyhow::{Context, Result};
use std::path::Path;

pub fn decode(path: &Path) -> Result<Decoded> {
	let data = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
	let image = image::load_from_memory_with_format(&data, image::ImageFormat::Jpeg)
		.with_context(|| format!("decoding {path:?}"))?;
	from_dynamic(image)
}
