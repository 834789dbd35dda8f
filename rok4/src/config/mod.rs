//! Server configuration.
//!
//! One YAML document describes the HTTP endpoint, the on-the-fly generator
//! limits, the tile matrix set directory, the styles, the pyramids with
//! their levels and storage, and the published layers. Relative paths
//! resolve against the configuration file directory. [`Config::build`]
//! turns the parsed document into the immutable registries the server
//! shares across threads.

use crate::ondemand::{WebService, WebServiceConfig};
use crate::onfly::OnFlyGenerator;
use crate::pyramid::{GenerationMode, Level, Pyramid, Source};
use crate::service::Layer;
use anyhow::{Context, Result, bail, ensure};
use rok4_core::crs::{Reprojector, SphericalMercator};
use rok4_core::format::PyramidFormat;
use rok4_core::matrix::TileMatrixSet;
use rok4_core::storage::{FileContext, StorageContext, SwiftContext};
use rok4_image::{MergeMethod, Style};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub server: ServerConfig,
	/// Directory holding one JSON descriptor per tile matrix set.
	pub tile_matrix_sets_dir: PathBuf,
	#[serde(default)]
	pub styles: Vec<Style>,
	pub pyramids: Vec<PyramidConfig>,
	pub layers: Vec<LayerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
	#[serde(default = "default_ip")]
	pub ip: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Concurrent on-the-fly generation workers.
	#[serde(default = "default_nb_process")]
	pub nb_process: usize,
	/// Wallclock cap of one generation worker, in seconds.
	#[serde(default = "default_autokill")]
	pub time_before_autokill: u64,
	/// Persisted list of in-flight generations, reaped at startup.
	#[serde(default = "default_state_file")]
	pub state_file: PathBuf,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			ip: default_ip(),
			port: default_port(),
			nb_process: default_nb_process(),
			time_before_autokill: default_autokill(),
			state_file: default_state_file(),
		}
	}
}

fn default_ip() -> String {
	"0.0.0.0".to_string()
}
fn default_port() -> u16 {
	9000
}
fn default_nb_process() -> usize {
	num_cpus::get().min(crate::onfly::MAX_NB_PROCESS)
}
fn default_autokill() -> u64 {
	600
}
fn default_state_file() -> PathBuf {
	PathBuf::from("rok4_onfly.state")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
	File {
		root: PathBuf,
	},
	Swift {
		endpoint: String,
		container: String,
		#[serde(default)]
		token: Option<String>,
		#[serde(default = "default_swift_timeout")]
		timeout: u64,
	},
}

fn default_swift_timeout() -> u64 {
	30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PyramidConfig {
	pub id: String,
	/// `TIFF_<compression>_<sampleformat>` token.
	pub format: String,
	pub channels: u16,
	#[serde(default)]
	pub nodata: Vec<f32>,
	/// Tile matrix set id, resolved in `tile_matrix_sets_dir`.
	pub tms: String,
	#[serde(default)]
	pub style: Option<String>,
	pub storage: StorageConfig,
	pub levels: Vec<LevelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LevelConfig {
	pub id: String,
	/// `[min_col, min_row, max_col, max_row]`.
	pub tile_range: [u32; 4],
	#[serde(default = "default_slab_tiles")]
	pub slab_tiles: [u32; 2],
	#[serde(default = "default_mode")]
	pub mode: String,
	#[serde(default = "default_merge")]
	pub merge: String,
	#[serde(default)]
	pub sources: Vec<SourceConfig>,
}

fn default_slab_tiles() -> [u32; 2] {
	[16, 16]
}
fn default_mode() -> String {
	"stored".to_string()
}
fn default_merge() -> String {
	"TOP".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
	#[serde(default)]
	pub pyramid: Option<String>,
	#[serde(default)]
	pub wms: Option<WebServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerConfig {
	pub id: String,
	#[serde(default)]
	pub title: Option<String>,
	pub pyramid: String,
	#[serde(default)]
	pub feature_info_url: Option<String>,
}

/// Everything [`Config::build`] produces: the immutable registries shared by
/// the serving threads.
pub struct Runtime {
	pub layers: Vec<Layer>,
	pub contexts: Vec<Arc<dyn StorageContext>>,
	pub onfly: Arc<OnFlyGenerator>,
	pub reprojector: Arc<dyn Reprojector>,
}

impl std::fmt::Debug for Runtime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Runtime")
			.field("layers", &self.layers.len())
			.field("contexts", &self.contexts.len())
			.finish_non_exhaustive()
	}
}

impl Config {
	pub fn from_string(yaml: &str) -> Result<Config> {
		serde_yaml_ng::from_str(yaml).context("parsing configuration")
	}

	pub fn from_path(path: &Path) -> Result<Config> {
		let yaml = std::fs::read_to_string(path).with_context(|| format!("reading configuration {path:?}"))?;
		let mut config = Config::from_string(&yaml)?;
		// resolve relative paths against the configuration directory
		if let Some(dir) = path.parent() {
			if config.tile_matrix_sets_dir.is_relative() {
				config.tile_matrix_sets_dir = dir.join(&config.tile_matrix_sets_dir);
			}
			if config.server.state_file.is_relative() {
				config.server.state_file = dir.join(&config.server.state_file);
			}
		}
		Ok(config)
	}

	/// Resolves every reference and opens every storage context. Pyramids
	/// may use earlier-declared pyramids as sources.
	pub fn build(&self) -> Result<Runtime> {
		let reprojector: Arc<dyn Reprojector> = Arc::new(SphericalMercator);

		let mut styles: HashMap<&str, &Style> = HashMap::new();
		for style in &self.styles {
			style.validate()?;
			ensure!(
				styles.insert(style.id.as_str(), style).is_none(),
				"duplicate style '{}'",
				style.id
			);
		}

		let mut tms_cache: HashMap<String, Arc<TileMatrixSet>> = HashMap::new();
		let mut contexts: Vec<Arc<dyn StorageContext>> = Vec::new();
		let mut pyramids: HashMap<String, Arc<Pyramid>> = HashMap::new();

		for pyramid_config in &self.pyramids {
			let pyramid = self.build_pyramid(pyramid_config, &styles, &mut tms_cache, &mut contexts, &pyramids)?;
			ensure!(
				pyramids.insert(pyramid_config.id.clone(), Arc::new(pyramid)).is_none(),
				"duplicate pyramid '{}'",
				pyramid_config.id
			);
		}

		let mut layers = Vec::new();
		for layer_config in &self.layers {
			let pyramid = pyramids
				.get(&layer_config.pyramid)
				.with_context(|| format!("layer '{}' references unknown pyramid '{}'", layer_config.id, layer_config.pyramid))?;
			layers.push(Layer {
				id: layer_config.id.clone(),
				title: layer_config.title.clone().unwrap_or_else(|| layer_config.id.clone()),
				pyramid: pyramid.clone(),
				feature_info_url: layer_config.feature_info_url.clone(),
			});
		}

		let onfly = Arc::new(OnFlyGenerator::new(
			self.server.nb_process,
			self.server.time_before_autokill,
			self.server.state_file.clone(),
			reprojector.clone(),
		));
		onfly.reap(&contexts)?;

		Ok(Runtime {
			layers,
			contexts,
			onfly,
			reprojector,
		})
	}

	fn build_pyramid(
		&self,
		config: &PyramidConfig,
		styles: &HashMap<&str, &Style>,
		tms_cache: &mut HashMap<String, Arc<TileMatrixSet>>,
		contexts: &mut Vec<Arc<dyn StorageContext>>,
		pyramids: &HashMap<String, Arc<Pyramid>>,
	) -> Result<Pyramid> {
		let format: PyramidFormat = config
			.format
			.parse()
			.with_context(|| format!("pyramid '{}'", config.id))?;

		let tms = match tms_cache.get(&config.tms) {
			Some(tms) => tms.clone(),
			None => {
				let path = self.tile_matrix_sets_dir.join(format!("{}.json", config.tms));
				let tms = Arc::new(TileMatrixSet::from_path(&path)?);
				tms_cache.insert(config.tms.clone(), tms.clone());
				tms
			}
		};

		let context: Arc<dyn StorageContext> = match &config.storage {
			StorageConfig::File { root } => Arc::new(FileContext::new(root)),
			StorageConfig::Swift {
				endpoint,
				container,
				token,
				timeout,
			} => Arc::new(SwiftContext::new(endpoint, container, token.as_deref(), *timeout)?),
		};
		contexts.push(context.clone());

		let style = match &config.style {
			None => None,
			Some(id) => Some(
				(*styles
					.get(id.as_str())
					.with_context(|| format!("pyramid '{}' references unknown style '{id}'", config.id))?)
				.clone(),
			),
		};

		let mut levels = Vec::new();
		for level_config in &config.levels {
			let matrix = tms
				.matrix(&level_config.id)
				.with_context(|| format!("pyramid '{}': level '{}' is not in TMS '{}'", config.id, level_config.id, config.tms))?
				.clone();

			let mode = match level_config.mode.to_lowercase().as_str() {
				"stored" => GenerationMode::Stored,
				"on_demand" | "ondemand" => GenerationMode::OnDemand,
				"on_fly" | "onfly" => GenerationMode::OnFly,
				other => bail!("level '{}': unknown generation mode '{other}'", level_config.id),
			};

			let mut sources = Vec::new();
			for source_config in &level_config.sources {
				match (&source_config.pyramid, &source_config.wms) {
					(Some(id), None) => {
						let source = pyramids
							.get(id)
							.with_context(|| format!("level '{}' references pyramid '{id}', which must be declared earlier", level_config.id))?;
						sources.push(Source::Pyramid(source.clone()));
					}
					(None, Some(wms)) => sources.push(Source::Wms(Arc::new(WebService::new(wms.clone())?))),
					_ => bail!("level '{}': a source is either a pyramid or a wms", level_config.id),
				}
			}

			let [min_col, min_row, max_col, max_row] = level_config.tile_range;
			levels.push(Level::new(
				&level_config.id,
				matrix,
				tms.crs().clone(),
				config.channels,
				format.sample_format,
				format.compression,
				(min_col, min_row, max_col, max_row),
				(level_config.slab_tiles[0], level_config.slab_tiles[1]),
				context.clone(),
				mode,
				sources,
				level_config.merge.parse::<MergeMethod>()?,
			)?);
		}

		Pyramid::new(&config.id, format, config.channels, config.nodata.clone(), tms, levels, style)
	}
}
