//! Blend N same-size images with a merge method.

use super::common::{parse_image_list, parse_nodata, write_output};
use anyhow::{Result, bail, ensure};
use rok4_core::format::Compression;
use rok4_image::{MergeImage, MergeMethod, SharedImage};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Configuration file: output image first, then the inputs, back to front
	#[arg(short = 'f', long = "file")]
	file: PathBuf,

	/// Merge method (TOP, ALPHATOP, MULTIPLY, LIGHTEN, DARKEN, MASK)
	#[arg(short = 'm', long)]
	method: String,

	/// Output compression
	#[arg(short = 'c', long, default_value = "raw")]
	compression: String,

	/// Color treated as transparent in the inputs: r,g,b
	#[arg(short = 't', long)]
	transparent: Option<String>,

	/// Background, one value per output channel, comma separated
	#[arg(short = 'b', long)]
	background: String,

	/// Output channel count (1..=4)
	#[arg(short = 's', long)]
	channels: u16,

	/// Output photometric (gray or rgb), informative
	#[arg(short = 'p', long, default_value = "rgb")]
	photometric: String,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let (output, inputs) = parse_image_list(&arguments.file)?;
	let method: MergeMethod = arguments.method.parse()?;
	let compression = Compression::from_tool_token(&arguments.compression)?;
	ensure!((1..=4).contains(&arguments.channels), "-s must be in 1..=4");
	match arguments.photometric.as_str() {
		"gray" | "rgb" => {}
		other => bail!("unknown photometric '{other}'"),
	}

	let background: Vec<u8> = parse_nodata(&arguments.background)?
		.iter()
		.map(|v| v.clamp(0.0, 255.0) as u8)
		.collect();
	ensure!(
		background.len() >= arguments.channels as usize,
		"-b must provide {} values",
		arguments.channels
	);
	let transparent = match &arguments.transparent {
		None => None,
		Some(value) => {
			let parts = parse_nodata(value)?;
			ensure!(parts.len() == 3, "-t takes exactly r,g,b");
			Some([parts[0] as u8, parts[1] as u8, parts[2] as u8])
		}
	};

	let mut children: Vec<SharedImage> = Vec::new();
	for entry in &inputs {
		children.push(entry.open(None)?);
	}

	let image: SharedImage = Arc::new(MergeImage::new(
		children,
		method,
		arguments.channels,
		background,
		transparent,
	)?);
	write_output(&output, &image, compression)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::Crs;
	use rok4_core::format::SampleFormat;
	use rok4_core::types::BBox;
	use rok4_image::file::write_tiff;
	use rok4_image::{EmptyImage, FileImage, ImageMeta, ImageNode};

	#[test]
	fn darken_blend_of_two_images() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let bbox = BBox::new(0.0, 0.0, 4.0, 4.0).unwrap();
		for (name, value) in [("a.tif", [200.0, 10.0, 90.0]), ("b.tif", [50.0, 180.0, 90.0])] {
			let meta = ImageMeta::new(4, 4, 3, SampleFormat::Uint8, bbox, Crs::from_id("EPSG:2154"))?;
			write_tiff(&dir.path().join(name), &EmptyImage::new(meta, value.to_vec()), Compression::None)?;
		}
		let list = dir.path().join("images.list");
		let out = dir.path().join("out.tif");
		std::fs::write(
			&list,
			format!(
				"IMG {} EPSG:2154 0 4 4 0 1 1\n\
				 IMG {} EPSG:2154 0 4 4 0 1 1\n\
				 IMG {} EPSG:2154 0 4 4 0 1 1\n",
				out.display(),
				dir.path().join("a.tif").display(),
				dir.path().join("b.tif").display()
			),
		)?;

		run(&Subcommand {
			file: list,
			method: "DARKEN".to_string(),
			compression: "zip".to_string(),
			transparent: None,
			background: "255,255,255".to_string(),
			channels: 3,
			photometric: "rgb".to_string(),
		})?;

		let result = FileImage::open(&out, bbox, Crs::from_id("EPSG:2154"))?;
		let mut line = vec![0u8; 12];
		result.read_line_u8(0, &mut line)?;
		assert_eq!(&line[..3], &[50, 10, 90]);
		Ok(())
	}

	#[test]
	fn transparency_method_is_rejected() {
		assert!("TRANSPARENCY".parse::<MergeMethod>().is_err());
	}
}
