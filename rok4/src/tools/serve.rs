//! Serve the configured pyramids over WMS, WMTS and TMS.

use anyhow::Result;
use rok4::config::Config;
use rok4::service::{serve, BasicCapabilities, ServerCore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(clap::Args, Debug)]
pub struct Subcommand {
	/// Server configuration file
	#[arg(short = 'f', long = "file")]
	file: PathBuf,
}

pub fn run(arguments: &Subcommand) -> Result<()> {
	let config = Config::from_path(&arguments.file)?;
	let runtime = config.build()?;

	let capabilities = BasicCapabilities::new(
		"ROK4",
		runtime.layers.iter().map(|l| (l.id.clone(), l.title.clone())).collect(),
	);
	let core = Arc::new(ServerCore::new(
		runtime.layers,
		runtime.reprojector,
		runtime.onfly,
		Box::new(capabilities),
	));

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?
		.block_on(serve(core, &config.server.ip, config.server.port))
}
