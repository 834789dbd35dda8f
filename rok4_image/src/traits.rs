//! The image node abstraction.

use anyhow::{Result, ensure};
use rok4_core::crs::Crs;
use rok4_core::format::{Photometric, SampleFormat};
use rok4_core::types::BBox;
use std::sync::Arc;

/// Relative tolerance when comparing two resolutions.
const RESOLUTION_TOLERANCE: f64 = 1e-6;
/// Absolute tolerance when comparing two grid phases.
const PHASE_TOLERANCE: f64 = 1e-4;

/// Immutable geometry and format of an image node.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMeta {
	width: u32,
	height: u32,
	channels: u16,
	sample_format: SampleFormat,
	bbox: BBox,
	crs: Crs,
}

impl ImageMeta {
	pub fn new(width: u32, height: u32, channels: u16, sample_format: SampleFormat, bbox: BBox, crs: Crs) -> Result<ImageMeta> {
		ensure!(width > 0, "image width must be > 0");
		ensure!(height > 0, "image height must be > 0");
		ensure!((1..=4).contains(&channels), "channels must be in 1..=4, got {channels}");
		ensure!(!bbox.is_null(), "image bbox must not be null: {bbox:?}");
		Ok(ImageMeta {
			width,
			height,
			channels,
			sample_format,
			bbox,
			crs,
		})
	}

	pub fn width(&self) -> u32 {
		self.width
	}

	pub fn height(&self) -> u32 {
		self.height
	}

	pub fn channels(&self) -> u16 {
		self.channels
	}

	pub fn sample_format(&self) -> SampleFormat {
		self.sample_format
	}

	pub fn bbox(&self) -> &BBox {
		&self.bbox
	}

	pub fn crs(&self) -> &Crs {
		&self.crs
	}

	pub fn res_x(&self) -> f64 {
		self.bbox.width() / f64::from(self.width)
	}

	pub fn res_y(&self) -> f64 {
		self.bbox.height() / f64::from(self.height)
	}

	pub fn photometric(&self) -> Photometric {
		Photometric::from_channels(self.channels).expect("channels validated at construction")
	}

	/// Samples per line.
	pub fn line_len(&self) -> usize {
		self.width as usize * self.channels as usize
	}

	/// Pixel column of the x coordinate `x` on this image's grid.
	pub fn column_of(&self, x: f64) -> i64 {
		((x - self.bbox.xmin) / self.res_x()).round() as i64
	}

	/// Pixel row of the y coordinate `y` (row 0 is the top line).
	pub fn row_of(&self, y: f64) -> i64 {
		((self.bbox.ymax - y) / self.res_y()).round() as i64
	}

	/// Two images are compatible when they share CRS, resolutions to 1e-6
	/// relative tolerance and grid phases to 1e-4.
	pub fn is_compatible_with(&self, other: &ImageMeta) -> bool {
		if self.crs.id() != other.crs.id() {
			return false;
		}
		let res_close = |a: f64, b: f64| (a - b).abs() <= RESOLUTION_TOLERANCE * a.abs().max(b.abs());
		if !res_close(self.res_x(), other.res_x()) || !res_close(self.res_y(), other.res_y()) {
			return false;
		}
		let phase_close = |a: f64, b: f64| {
			let d = (a - b).abs();
			d <= PHASE_TOLERANCE || (1.0 - d) <= PHASE_TOLERANCE
		};
		phase_close(self.bbox.phase_x(self.res_x()), other.bbox.phase_x(other.res_x()))
			&& phase_close(self.bbox.phase_y(self.res_y()), other.bbox.phase_y(other.res_y()))
	}
}

/// A lazy row producer.
///
/// `read_line_*` fills exactly `width·channels` samples for `y` in
/// `0..height`; the call is deterministic and idempotent. Nodes never fail a
/// line read for data reasons: unreadable pixels become nodata and the
/// condition is logged. Errors are reserved for programming errors
/// (out-of-range `y`, undersized buffer).
///
/// The native sample type of a node is its `sample_format()`; the other two
/// entry points convert with clamping and the linear `0..255 ↔ 0.0..1.0`
/// mapping.
pub trait ImageNode: Send + Sync {
	fn meta(&self) -> &ImageMeta;

	/// Companion mask: same geometry, one 8-bit channel, 0 = no data.
	fn mask(&self) -> Option<&dyn ImageNode> {
		None
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()>;

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		let mut tmp = vec![0u8; self.meta().line_len()];
		self.read_line_u8(y, &mut tmp)?;
		super::samples::u8_to_u16(&tmp, buffer);
		Ok(())
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		let mut tmp = vec![0u8; self.meta().line_len()];
		self.read_line_u8(y, &mut tmp)?;
		super::samples::u8_to_f32(&tmp, buffer);
		Ok(())
	}

	fn width(&self) -> u32 {
		self.meta().width()
	}

	fn height(&self) -> u32 {
		self.meta().height()
	}

	fn channels(&self) -> u16 {
		self.meta().channels()
	}
}

/// Nodes shared between an image tree and its mask tree.
pub type SharedImage = Arc<dyn ImageNode>;

/// Detaches the mask of a shared node into a node of its own, so it can be
/// fed to consumers that take masks as separate inputs (resampling,
/// reprojection).
pub struct MaskAdapter {
	parent: SharedImage,
	meta: ImageMeta,
}

impl MaskAdapter {
	/// `None` when `parent` carries no mask.
	pub fn of(parent: SharedImage) -> Option<MaskAdapter> {
		let meta = parent.mask()?.meta().clone();
		Some(MaskAdapter { parent, meta })
	}
}

impl ImageNode for MaskAdapter {
	fn meta(&self) -> &ImageMeta {
		&self.meta
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		self
			.parent
			.mask()
			.expect("mask presence checked at construction")
			.read_line_u8(y, buffer)
	}
}

/// Pairs an image with an externally provided mask (a `MSK` companion file,
/// typically).
pub struct MaskedImage {
	image: SharedImage,
	mask: SharedImage,
}

impl MaskedImage {
	pub fn new(image: SharedImage, mask: SharedImage) -> Result<MaskedImage> {
		ensure!(
			mask.meta().width() == image.meta().width()
				&& mask.meta().height() == image.meta().height()
				&& mask.meta().channels() == 1,
			"a mask must be a single-channel image of the same size as its image"
		);
		Ok(MaskedImage { image, mask })
	}
}

impl ImageNode for MaskedImage {
	fn meta(&self) -> &ImageMeta {
		self.image.meta()
	}

	fn mask(&self) -> Option<&dyn ImageNode> {
		Some(self.mask.as_ref())
	}

	fn read_line_u8(&self, y: u32, buffer: &mut [u8]) -> Result<()> {
		self.image.read_line_u8(y, buffer)
	}

	fn read_line_u16(&self, y: u32, buffer: &mut [u16]) -> Result<()> {
		self.image.read_line_u16(y, buffer)
	}

	fn read_line_f32(&self, y: u32, buffer: &mut [f32]) -> Result<()> {
		self.image.read_line_f32(y, buffer)
	}
}

/// Checks a line request against the node geometry; every `read_line_*`
/// implementation starts here.
pub fn check_line(meta: &ImageMeta, y: u32, buffer_len: usize) -> Result<()> {
	ensure!(y < meta.height(), "line {y} out of range (height {})", meta.height());
	ensure!(
		buffer_len >= meta.line_len(),
		"line buffer too small: {buffer_len} < {}",
		meta.line_len()
	);
	Ok(())
}
