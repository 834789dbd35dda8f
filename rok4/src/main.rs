mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser, Debug)]
#[command(
	author,
	version,
	about = "Publish raster pyramids and serve map tiles over WMS, WMTS and TMS.",
	propagate_version = true,
	disable_help_subcommand = true,
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	#[command(flatten)]
	verbose: Verbosity<WarnLevel>,

	/// Shortcut for debug-level logs
	#[arg(short = 'd', long, global = true)]
	debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Serve pyramids over WMS, WMTS and TMS
	Serve(tools::serve::Subcommand),

	/// Merge, resample and reproject N images onto one output image
	MergeNtiff(tools::merge_ntiff::Subcommand),

	/// Decimate N images onto a coarser output image, no interpolation
	DecimateNtiff(tools::decimate_ntiff::Subcommand),

	/// Blend N same-size images with a merge method
	OverlayNtiff(tools::overlay_ntiff::Subcommand),

	/// Subsample a 2x2 block of tiles into one tile
	Merge4tiff(tools::merge4tiff::Subcommand),

	/// Arrange N same-geometry images into one grid image
	ComposeNtiff(tools::compose_ntiff::Subcommand),

	/// Verify that an image file decodes
	CheckWork(tools::check_work::Subcommand),

	/// Explode a slab into independent tile objects
	Slab2tiles(tools::slab2tiles::Subcommand),

	/// Convert a work image into a slab
	Work2cache(tools::work2cache::Subcommand),
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let level = if cli.debug {
		log::LevelFilter::Debug
	} else {
		cli.verbose.log_level_filter()
	};
	env_logger::Builder::new().filter_level(level).format_timestamp(None).init();

	run(cli)
}

fn run(cli: Cli) -> Result<()> {
	match &cli.command {
		Commands::Serve(arguments) => tools::serve::run(arguments),
		Commands::MergeNtiff(arguments) => tools::merge_ntiff::run(arguments),
		Commands::DecimateNtiff(arguments) => tools::decimate_ntiff::run(arguments),
		Commands::OverlayNtiff(arguments) => tools::overlay_ntiff::run(arguments),
		Commands::Merge4tiff(arguments) => tools::merge4tiff::run(arguments),
		Commands::ComposeNtiff(arguments) => tools::compose_ntiff::run(arguments),
		Commands::CheckWork(arguments) => tools::check_work::run(arguments),
		Commands::Slab2tiles(arguments) => tools::slab2tiles::run(arguments),
		Commands::Work2cache(arguments) => tools::work2cache::run(arguments),
	}
}
