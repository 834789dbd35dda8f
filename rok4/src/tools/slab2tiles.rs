//! Explode a slab into independent tile objects.

use anyhow::{Context, Result};
use rok4_container::{SlabReader, DEFAULT_MEMORY_SIZE};
use rok4_core::format::Compression;
use rok4_core::storage::{FileContext, StorageContext, SwiftContext};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Slab file to read
	input: PathBuf,

	/// Output directory (or Swift endpoint when --container is given)
	#[arg(short = 'o', long)]
	output: String,

	/// Write to a Swift container instead of a directory
	#[arg(long)]
	container: Option<String>,

	/// Swift authentication token
	#[arg(long)]
	token: Option<String>,

	/// Prefix of the written tile objects
	#[arg(short = 'p', long, default_value = "")]
	prefix: String,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let input_dir = arguments.input.parent().unwrap_or(std::path::Path::new("."));
	let input_name = arguments
		.input
		.file_name()
		.and_then(|n| n.to_str())
		.context("the input path has no file name")?;
	let source: Arc<dyn StorageContext> = Arc::new(FileContext::new(input_dir));
	let reader = SlabReader::open(source, input_name, DEFAULT_MEMORY_SIZE)?;

	let destination: Arc<dyn StorageContext> = match &arguments.container {
		None => Arc::new(FileContext::new(std::path::Path::new(&arguments.output))),
		Some(container) => Arc::new(SwiftContext::new(&arguments.output, container, arguments.token.as_deref(), 30)?),
	};

	let header = reader.header();
	let extension = match header.compression {
		Compression::Jpeg => "jpg",
		Compression::Png => "png",
		_ => "tif",
	};
	for row in 0..header.tiles_high() {
		for col in 0..header.tiles_wide() {
			let index = reader.tile_index(col, row)?;
			let tile = reader
				.get_encoded_tile(index)
				.with_context(|| format!("tile ({col}, {row})"))?;
			let key = format!("{}{}_{}.{extension}", arguments.prefix, col, row);
			destination.write(&key, &tile)?;
		}
	}
	log::info!(
		"wrote {} tiles from {:?}",
		header.tile_count(),
		arguments.input
	);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_container::SlabWriter;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;
	use rok4_image::{EmptyImage, ImageMeta};

	#[test]
	fn explodes_a_slab_into_tiles() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let meta = ImageMeta::new(
			32,
			32,
			3,
			SampleFormat::Uint8,
			BBox::new(0.0, 0.0, 32.0, 32.0).unwrap(),
			Crs::from_id("EPSG:3857"),
		)?;
		let context = FileContext::new(dir.path());
		SlabWriter::new(16, 16, Compression::Png, false).write(
			&context,
			"slab.tif",
			&EmptyImage::new(meta, vec![1.0, 2.0, 3.0]),
		)?;

		let out = dir.path().join("tiles");
		run(&Subcommand {
			input: dir.path().join("slab.tif"),
			output: out.display().to_string(),
			container: None,
			token: None,
			prefix: "t_".to_string(),
		})?;

		for name in ["t_0_0.png", "t_1_0.png", "t_0_1.png", "t_1_1.png"] {
			let tile = std::fs::read(out.join(name))?;
			assert_eq!(&tile[..4], &[0x89, b'P', b'N', b'G'], "{name}");
		}
		Ok(())
	}
}
