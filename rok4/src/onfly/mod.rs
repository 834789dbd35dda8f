//! On-the-fly slab generation with cooperative exclusion.
//!
//! When a tile of an `ON_FLY` level is missing, the serving request answers
//! with an on-demand synthesis of that single tile and, in parallel, a
//! worker persists the whole slab so the next requests hit storage. Mutual
//! exclusion between workers (including workers of other serving processes
//! sharing the storage) rests on two sentinel objects next to the slab:
//!
//! - `<slab>.tmp`: a generation is running; created atomically, the single
//!   winner of the race owns the generation;
//! - `<slab>.err`: the last generation failed; nobody retries until an
//!   operator removes it, which prevents regeneration storms.
//!
//! The set of in-flight slabs is persisted to a state file. A restarting
//! server reaps every sentinel recorded there unconditionally: the state
//! file is owned by exactly one serving process, so after a restart no
//! recorded worker can still be alive.

use crate::ondemand::{synthesize, SynthesisRequest};
use crate::pyramid::{Level, Pyramid};
use anyhow::{Context, Result};
use rok4_container::SlabWriter;
use rok4_core::crs::Reprojector;
use rok4_core::storage::StorageContext;
use rok4_image::{ImageMeta, ImageNode, Kernel, SharedImage};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Hard cap on concurrent generation workers.
pub const MAX_NB_PROCESS: usize = 16;

pub struct OnFlyGenerator {
	max_workers: usize,
	timeout: Duration,
	state_path: PathBuf,
	reprojector: Arc<dyn Reprojector>,
	/// In-flight sentinels of this process, as `container\tkey` entries.
	active: Mutex<HashSet<String>>,
}

impl OnFlyGenerator {
	pub fn new(
		max_workers: usize,
		timeout_secs: u64,
		state_path: PathBuf,
		reprojector: Arc<dyn Reprojector>,
	) -> OnFlyGenerator {
		OnFlyGenerator {
			max_workers: max_workers.clamp(1, MAX_NB_PROCESS),
			timeout: Duration::from_secs(timeout_secs),
			state_path,
			reprojector,
			active: Mutex::new(HashSet::new()),
		}
	}

	/// Removes the sentinels a previous run left behind, then clears the
	/// state file.
	pub fn reap(&self, contexts: &[Arc<dyn StorageContext>]) -> Result<()> {
		let Ok(state) = std::fs::read_to_string(&self.state_path) else {
			return Ok(());
		};
		for line in state.lines().filter(|l| !l.is_empty()) {
			let Some((container, key)) = line.split_once('\t') else {
				continue;
			};
			match contexts.iter().find(|c| c.container() == container) {
				Some(context) => {
					log::warn!("reaping stale sentinel '{key}' in '{container}'");
					context.remove(key).ok();
				}
				None => log::warn!("stale sentinel '{key}' references unknown container '{container}'"),
			}
		}
		std::fs::write(&self.state_path, "").with_context(|| format!("clearing state file {:?}", self.state_path))
	}

	/// True when the slab holding `(col, row)` can be served from storage:
	/// present, and no sentinel hides it.
	pub fn slab_ready(&self, level: &Level, col: u32, row: u32) -> bool {
		let key = level.slab_key(col, row);
		let context = level.context();
		context.exists(&key) && !context.exists(&format!("{key}.tmp")) && !context.exists(&format!("{key}.err"))
	}

	/// True when a sentinel marks the slab as being generated or broken;
	/// serving falls back to on-demand without triggering anything.
	pub fn slab_blocked(&self, level: &Level, col: u32, row: u32) -> bool {
		let key = level.slab_key(col, row);
		let context = level.context();
		context.exists(&format!("{key}.tmp")) || context.exists(&format!("{key}.err"))
	}

	fn persist_state(&self, active: &HashSet<String>) {
		let mut lines: Vec<&str> = active.iter().map(String::as_str).collect();
		lines.sort_unstable();
		let body = lines.join("\n");
		if let Err(error) = std::fs::write(&self.state_path, body) {
			log::error!("cannot persist generator state to {:?}: {error}", self.state_path);
		}
	}

	/// Starts a worker for the slab holding `(col, row)`, unless the pool is
	/// full or this process already generates it. Returns whether a worker
	/// was spawned.
	pub fn trigger(self: &Arc<Self>, pyramid: &Arc<Pyramid>, level: &Arc<Level>, col: u32, row: u32) -> bool {
		let key = level.slab_key(col, row);
		let tmp_key = format!("{key}.tmp");
		let entry = format!("{}\t{}", level.context().container(), tmp_key);

		{
			let mut active = self.active.lock().unwrap();
			if active.len() >= self.max_workers || active.contains(&entry) {
				return false;
			}
			active.insert(entry.clone());
			self.persist_state(&active);
		}

		let generator = self.clone();
		let pyramid = pyramid.clone();
		let level = level.clone();
		std::thread::spawn(move || {
			generator.run_worker(&pyramid, &level, col, row, &key, &tmp_key);
			let mut active = generator.active.lock().unwrap();
			active.remove(&entry);
			generator.persist_state(&active);
		});
		true
	}

	fn run_worker(&self, pyramid: &Arc<Pyramid>, level: &Arc<Level>, col: u32, row: u32, key: &str, tmp_key: &str) {
		let context = level.context();
		// winner-takes-all: losing the race means another worker owns it
		match context.create_exclusive(tmp_key) {
			Ok(true) => {}
			Ok(false) => {
				log::debug!("slab '{key}': another worker won the sentinel race");
				return;
			}
			Err(error) => {
				log::error!("slab '{key}': cannot create sentinel: {error:#}");
				return;
			}
		}

		log::info!("generating slab '{key}' of level '{}'", level.id());
		let result = self.generate_slab(pyramid, level, col, row, key);
		match result {
			Ok(()) => {
				context.remove(&format!("{key}.err")).ok();
				level.invalidate_reader(col, row);
				log::info!("slab '{key}' generated");
			}
			Err(error) => {
				log::error!("slab '{key}' generation failed: {error:#}");
				// never leave a partial slab behind, and record the failure
				context.remove(key).ok();
				context.write(&format!("{key}.err"), &format!("{error:#}").into()).ok();
			}
		}
		context.remove(tmp_key).ok();
	}

	fn generate_slab(&self, pyramid: &Arc<Pyramid>, level: &Arc<Level>, col: u32, row: u32, key: &str) -> Result<()> {
		let meta = level.slab_meta(col, row)?;
		let request = SynthesisRequest {
			bbox: *meta.bbox(),
			width: meta.width(),
			height: meta.height(),
			crs: meta.crs().clone(),
			channels: level.channels(),
			sample_format: level.sample_format(),
			nodata: pyramid.nodata().to_vec(),
			kernel: Kernel::Cubic,
		};
		let image = synthesize(&request, level.sources(), level.merge_method(), self.reprojector.as_ref())?;
		let guarded = DeadlineImage {
			meta: image.meta().clone(),
			source: image,
			deadline: Instant::now() + self.timeout,
		};
		let writer = SlabWriter::new(
			level.matrix().tile_width,
			level.matrix().tile_height,
			level.compression(),
			false,
		);
		writer.write(level.context().as_ref(), key, &guarded)
	}
}

/// Enforces the worker wallclock cap: every line read checks the deadline,
/// so a runaway generation aborts between rows instead of running forever.
struct DeadlineImage {
	meta: ImageMeta,
	source: SharedImage,
	deadline: Instant,
}

impl DeadlineImage {
	fn check(&self) -> Result<()> {
		anyhow::ensure!(Instant::now() < self.deadline, "slab generation timed out");
		Ok(())
	}
}

impl ImageNode for DeadlineImage {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		self.check()?;
		self.source.read_line_u8(y, buffer)
	}

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		self.check()?;
		self.source.read_line_u16(y, buffer)
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		self.check()?;
		self.source.read_line_f32(y, buffer)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::SphericalMercator;
	use rok4_core::storage::MemoryContext;

	fn generator(dir: &std::path::Path) -> Arc<OnFlyGenerator> {
		Arc::new(OnFlyGenerator::new(
			4,
			60,
			dir.join("generator.state"),
			Arc::new(SphericalMercator),
		))
	}

	#[test]
	fn reap_removes_recorded_sentinels() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let onfly = generator(dir.path());
		let context: Arc<dyn StorageContext> = Arc::new(MemoryContext::new("pool"));
		context.write("12/3_4.tif.tmp", &rok4_core::types::Blob::new_empty())?;
		std::fs::write(dir.path().join("generator.state"), "pool\t12/3_4.tif.tmp\n")?;

		onfly.reap(&[context.clone()])?;
		assert!(!context.exists("12/3_4.tif.tmp"));
		assert_eq!(std::fs::read_to_string(dir.path().join("generator.state"))?, "");
		Ok(())
	}

	#[test]
	fn reap_without_state_file_is_a_noop() -> Result<()> {
		let dir = tempfile::tempdir()?;
		generator(dir.path()).reap(&[])
	}

	#[test]
	fn deadline_image_stops_late_reads() {
		let meta = ImageMeta::new(
			4,
			4,
			1,
			rok4_core::format::SampleFormat::Uint8,
			rok4_core::types::BBox::new(0.0, 0.0, 4.0, 4.0).unwrap(),
			rok4_core::crs::Crs::from_id("EPSG:3857"),
		)
		.unwrap();
		let source: SharedImage = Arc::new(rok4_image::EmptyImage::new(meta.clone(), vec![0.0]));
		let expired = DeadlineImage {
			meta,
			source,
			deadline: Instant::now() - Duration::from_secs(1),
		};
		let mut line = vec![0u8; 4];
		assert!(expired.read_line_u8(0, &mut line).is_err());
	}
}
