//! Arrange N same-geometry images into one grid image.

use super::common::{parse_image_list, write_output};
use anyhow::{Result, ensure};
use rok4_core::format::Compression;
use rok4_image::{CompoundImage, SharedImage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Configuration file: output image first, then the inputs, row major
	#[arg(short = 'f', long = "file")]
	file: PathBuf,

	/// Grid size: width then height
	#[arg(short = 'g', long, num_args = 2)]
	grid: Vec<usize>,

	/// Output compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let (output, inputs) = parse_image_list(&arguments.file)?;
	let compression = Compression::from_tool_token(&arguments.compression)?;
	ensure!(arguments.grid.len() == 2, "-g takes the grid width and height");
	let (grid_width, grid_height) = (arguments.grid[0], arguments.grid[1]);
	ensure!(
		inputs.len() == grid_width * grid_height,
		"a {grid_width}x{grid_height} grid needs {} inputs, got {}",
		grid_width * grid_height,
		inputs.len()
	);

	let mut children: Vec<SharedImage> = Vec::new();
	for entry in &inputs {
		children.push(entry.open(None)?);
	}
	let image: SharedImage = Arc::new(CompoundImage::new(children, grid_width)?);
	ensure!(
		image.meta().width() == output.width() && image.meta().height() == output.height(),
		"the composed grid is {}x{} but the output declares {}x{}",
		image.meta().width(),
		image.meta().height(),
		output.width(),
		output.height()
	);
	write_output(&output, &image, compression)
}
