//! Convert a work image into a slab.

use super::common::forced_sample_format;
use anyhow::{Context, Result, ensure};
use rok4_container::SlabWriter;
use rok4_core::crs::Crs;
use rok4_core::format::Compression;
use rok4_core::storage::FileContext;
use rok4_core::types::BBox;
use rok4_image::{FileImage, ImageNode};
use std::path::PathBuf;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Input work image
	input: PathBuf,

	/// Output slab
	output: PathBuf,

	/// Tile size: width then height
	#[arg(short = 't', long, num_args = 2, default_values_t = [256, 256])]
	tile: Vec<u32>,

	/// Tile compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,

	/// Whiten JPEG blocks touching pure white pixels
	#[arg(long)]
	crop: bool,

	/// Force the output sample format (uint or float)
	#[arg(short = 'a', long)]
	sample_format: Option<String>,

	/// Force the output bits per sample (8 or 32)
	#[arg(short = 'b', long)]
	bits: Option<u16>,

	/// Force the output channel count (1..=4)
	#[arg(short = 's', long)]
	channels: Option<u16>,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let compression = Compression::from_tool_token(&arguments.compression)?;
	ensure!(arguments.tile.len() == 2, "-t takes the tile width and height");
	let forced = forced_sample_format(arguments.sample_format.as_deref(), arguments.bits)?;

	// the slab is georeferencing-free at this stage: the pyramid descriptor
	// carries the geometry
	let bbox = BBox::new(0.0, 0.0, 1.0, 1.0).expect("static bbox");
	let mut image =
		FileImage::open(&arguments.input, bbox, Crs::from_id("LOCAL")).with_context(|| format!("{:?}", arguments.input))?;
	if let Some(channels) = arguments.channels {
		if channels != image.meta().channels() {
			image.convert_to_channels(channels)?;
		}
	}
	if let Some(forced) = forced {
		ensure!(
			forced == image.meta().sample_format(),
			"converting {} to {forced} is not supported by this tool",
			image.meta().sample_format()
		);
	}

	let output_dir = arguments.output.parent().unwrap_or(std::path::Path::new("."));
	let output_name = arguments
		.output
		.file_name()
		.and_then(|n| n.to_str())
		.context("the output path has no file name")?;
	let context = FileContext::new(output_dir);
	SlabWriter::new(arguments.tile[0], arguments.tile[1], compression, arguments.crop).write(
		&context,
		output_name,
		&image,
	)?;
	log::info!("wrote slab {:?}", arguments.output);
	Ok(())
}
