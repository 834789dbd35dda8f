//! Assembly of a requested image from a level's source list.
//!
//! Sources are visited back to front. Pyramid sources contribute a mosaic
//! of their stored tiles at the best-matching level, resampled (same CRS)
//! or reprojected (different CRS) onto the request geometry, with the
//! pyramid style applied on top. Web service sources contribute decoded
//! GetMap responses. Whatever could not be produced is nodata; the merge
//! method of the level combines the surviving layers.

use crate::pyramid::{Pyramid, Source};
use anyhow::{Context, Result};
use rok4_core::crs::{Crs, Reprojector};
use rok4_core::format::SampleFormat;
use rok4_core::types::BBox;
use rok4_image::{
	mirror_size_for, EmptyImage, ImageMeta, Kernel, MaskAdapter, MergeImage, MergeMethod, MirrorImage, ReprojectedImage,
	ResampledImage, SharedImage,
};
use std::sync::Arc;

/// Everything the synthesizer needs to know about the requested image.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
	pub bbox: BBox,
	pub width: u32,
	pub height: u32,
	pub crs: Crs,
	pub channels: u16,
	pub sample_format: SampleFormat,
	/// One native-unit value per channel.
	pub nodata: Vec<f32>,
	pub kernel: Kernel,
}

impl SynthesisRequest {
	pub fn res_x(&self) -> f64 {
		self.bbox.width() / f64::from(self.width)
	}

	pub fn res_y(&self) -> f64 {
		self.bbox.height() / f64::from(self.height)
	}

	fn target_meta(&self, channels: u16, sample_format: SampleFormat) -> Result<ImageMeta> {
		ImageMeta::new(self.width, self.height, channels, sample_format, self.bbox, self.crs.clone())
	}
}

/// Builds the image answering `request` from `sources`, back to front.
pub fn synthesize(
	request: &SynthesisRequest,
	sources: &[Source],
	merge_method: MergeMethod,
	reprojector: &dyn Reprojector,
) -> Result<SharedImage> {
	let mut layers: Vec<SharedImage> = Vec::new();
	for source in sources {
		let layer = match source {
			Source::Pyramid(pyramid) => pyramid_layer(request, pyramid, reprojector)
				.with_context(|| format!("source pyramid '{}'", pyramid.id()))?,
			Source::Wms(service) => wms_layer(request, service, reprojector).context("source web service")?,
		};
		if let Some(layer) = layer {
			layers.push(layer);
		}
	}

	match layers.len() {
		0 => Ok(Arc::new(EmptyImage::new(
			request.target_meta(request.channels, request.sample_format)?,
			request.nodata.clone(),
		))),
		1 => Ok(layers.pop().expect("one layer")),
		_ => {
			if merge_method == MergeMethod::Top || request.sample_format.is_float() {
				// draw-order overlay keeps native precision
				let meta = request.target_meta(request.channels, request.sample_format)?;
				Ok(Arc::new(rok4_image::ExtendedCompoundImage::new(
					meta,
					layers,
					request.nodata.clone(),
				)?))
			} else {
				let background: Vec<u8> = request.nodata.iter().map(|v| v.clamp(0.0, 255.0) as u8).collect();
				Ok(Arc::new(MergeImage::new(
					layers,
					merge_method,
					request.channels,
					background,
					None,
				)?))
			}
		}
	}
}

/// One pyramid source: mosaic at the best level, mirrored for the kernel
/// margin, resampled or reprojected onto the request, styled.
fn pyramid_layer(
	request: &SynthesisRequest,
	pyramid: &Arc<Pyramid>,
	reprojector: &dyn Reprojector,
) -> Result<Option<SharedImage>> {
	if !reprojector.handles(&request.crs, pyramid.crs()) {
		log::warn!(
			"skipping pyramid '{}': no reprojection {} -> {}",
			pyramid.id(),
			request.crs,
			pyramid.crs()
		);
		return Ok(None);
	}

	// request footprint in the pyramid's CRS, limited to where that CRS is
	// defined
	let mut bbox = match reprojector.reproject_bbox(&request.bbox, &request.crs, pyramid.crs()) {
		Ok(bbox) => bbox,
		Err(_) => return Ok(None),
	};
	bbox.crop_to(pyramid.crs().definition_area());
	if bbox.is_null() {
		return Ok(None);
	}

	let res_x = bbox.width() / f64::from(request.width);
	let res_y = bbox.height() / f64::from(request.height);
	let Some(level) = pyramid.best_level((res_x * res_y).sqrt(), true) else {
		return Ok(None);
	};

	// widen by the kernel support before snapping to tiles, so every output
	// sample finds its convolution window inside the mosaic
	let ratio = res_x.max(res_y) / level.resolution();
	let margin = mirror_size_for(request.kernel.size(ratio));
	let mut covered = bbox;
	covered.expand(
		level.matrix().res_x * f64::from(margin),
		level.matrix().res_y * f64::from(margin),
		1,
	);
	let mosaic = pyramid.mosaic(level, &covered)?;
	// the mask keeps the true footprint: it is resampled from the original
	// mosaic, not from the mirrored extension
	let mask = MaskAdapter::of(mosaic.clone()).map(|m| Arc::new(m) as SharedImage);
	let mirrored: SharedImage = match MirrorImage::around(mosaic.clone(), margin) {
		Ok(mirrored) => Arc::new(mirrored),
		// mosaic smaller than the margin: fall back to clamped sampling
		Err(_) => mosaic,
	};

	let target = request.target_meta(pyramid.channels(), pyramid.format().sample_format)?;
	let mut layer: SharedImage = if pyramid.crs().id() == request.crs.id() {
		Arc::new(ResampledImage::new(mirrored, target, request.kernel, mask)?)
	} else {
		Arc::new(ReprojectedImage::new(
			mirrored,
			target,
			request.kernel,
			reprojector,
			pyramid.nodata().to_vec(),
			mask,
		)?)
	};

	if let Some(style) = pyramid.style() {
		layer = style.apply(layer)?;
	}
	Ok(Some(layer))
}

/// One web service source: GetMap in the service's CRS, reprojected onto
/// the request when the CRSs differ.
fn wms_layer(
	request: &SynthesisRequest,
	service: &crate::ondemand::WebService,
	reprojector: &dyn Reprojector,
) -> Result<Option<SharedImage>> {
	let nodata: Vec<f32> = request
		.nodata
		.iter()
		.copied()
		.chain(std::iter::repeat(255.0))
		.take(service.channels() as usize)
		.collect();

	if service.crs().id() == request.crs.id() {
		return service.image_for(&request.bbox, request.width, request.height, &nodata);
	}

	if !reprojector.handles(&request.crs, service.crs()) {
		log::warn!("skipping web service: no reprojection {} -> {}", request.crs, service.crs());
		return Ok(None);
	}
	let bbox = match reprojector.reproject_bbox(&request.bbox, &request.crs, service.crs()) {
		Ok(bbox) => bbox,
		Err(_) => return Ok(None),
	};
	let Some(fetched) = service.image_for(&bbox, request.width, request.height, &nodata)? else {
		return Ok(None);
	};
	let target = request.target_meta(service.channels(), SampleFormat::Uint8)?;
	Ok(Some(Arc::new(ReprojectedImage::new(
		fetched,
		target,
		request.kernel,
		reprojector,
		nodata,
		None,
	)?)))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::crs::SphericalMercator;

	#[test]
	fn no_sources_means_nodata() {
		let request = SynthesisRequest {
			bbox: BBox::new(0.0, 0.0, 256.0, 256.0).unwrap(),
			width: 256,
			height: 256,
			crs: Crs::from_id("EPSG:3857"),
			channels: 3,
			sample_format: SampleFormat::Uint8,
			nodata: vec![255.0, 0.0, 0.0],
			kernel: Kernel::Cubic,
		};
		let image = synthesize(&request, &[], MergeMethod::AlphaTop, &SphericalMercator).unwrap();
		let mut line = vec![0u8; 256 * 3];
		image.read_line_u8(0, &mut line).unwrap();
		assert_eq!(&line[..3], &[255, 0, 0]);
	}
}
