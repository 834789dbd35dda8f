//! Request dispatch: layer lookup, level dispatch, graph construction,
//! encoding.

use super::capabilities::CapabilitiesSource;
use super::data_stream::DataStream;
use super::exception::exception_stream;
use super::request::{GetFeatureInfoRequest, GetMapRequest, GetTileRequest, ParsedRequest};
use crate::ondemand::{synthesize, SynthesisRequest};
use crate::onfly::OnFlyGenerator;
use crate::pyramid::{GenerationMode, Level, Pyramid, Source};
use rok4_core::crs::{Crs, Reprojector};
use rok4_core::error::{ServiceError, ServiceErrorKind};
use rok4_core::types::{BBox, Blob};
use rok4_image::{encode_image, ImageNode, Kernel, OutputFormat, SharedImage};
use std::collections::HashMap;
use std::sync::Arc;

/// Largest GetMap edge, in pixels.
const MAX_MAP_SIZE: u32 = 8192;

pub struct Layer {
	pub id: String,
	pub title: String,
	pub pyramid: Arc<Pyramid>,
	/// Proxy target for GetFeatureInfo, when configured.
	pub feature_info_url: Option<String>,
}

pub struct ServerCore {
	layers: HashMap<String, Arc<Layer>>,
	reprojector: Arc<dyn Reprojector>,
	onfly: Arc<OnFlyGenerator>,
	capabilities: Box<dyn CapabilitiesSource>,
}

impl ServerCore {
	pub fn new(
		layers: Vec<Layer>,
		reprojector: Arc<dyn Reprojector>,
		onfly: Arc<OnFlyGenerator>,
		capabilities: Box<dyn CapabilitiesSource>,
	) -> ServerCore {
		ServerCore {
			layers: layers.into_iter().map(|l| (l.id.clone(), Arc::new(l))).collect(),
			reprojector,
			onfly,
			capabilities,
		}
	}

	pub fn layers(&self) -> impl Iterator<Item = &Arc<Layer>> {
		self.layers.values()
	}

	pub fn layer(&self, id: &str) -> Result<&Arc<Layer>, ServiceError> {
		self
			.layers
			.get(id)
			.ok_or_else(|| ServiceError::not_found(format!("layer '{id}' does not exist")))
	}

	/// Entry point: never fails, protocol errors become exception streams.
	pub fn handle(&self, request: &ParsedRequest) -> DataStream {
		let result = match request {
			ParsedRequest::WmsGetCapabilities => Ok(DataStream::ok("text/xml", self.capabilities.wms_capabilities())),
			ParsedRequest::WmtsGetCapabilities => Ok(DataStream::ok("text/xml", self.capabilities.wmts_capabilities())),
			ParsedRequest::GetMap(map) => self.get_map(map),
			ParsedRequest::GetTile(tile) => self.get_tile(tile),
			ParsedRequest::GetFeatureInfo(info) => self.get_feature_info(info),
		};
		result.unwrap_or_else(|error| {
			log::debug!("request failed: {error}");
			exception_stream(&error)
		})
	}

	/// The synthesis request answering a GetMap-shaped geometry for one
	/// layer.
	fn layer_request(&self, layer: &Layer, bbox: &BBox, crs: &Crs, width: u32, height: u32) -> SynthesisRequest {
		let pyramid = &layer.pyramid;
		SynthesisRequest {
			bbox: *bbox,
			width,
			height,
			crs: crs.clone(),
			channels: pyramid.channels(),
			sample_format: pyramid.format().sample_format,
			nodata: pyramid.nodata().to_vec(),
			kernel: Kernel::Cubic,
		}
	}

	/// Builds the image of one layer over a request geometry, honouring the
	/// generation mode of the level matching the requested resolution.
	fn layer_image(&self, layer: &Layer, bbox: &BBox, crs: &Crs, width: u32, height: u32) -> Result<SharedImage, ServiceError> {
		let pyramid = &layer.pyramid;
		let request = self.layer_request(layer, bbox, crs, width, height);

		// resolve the level in the pyramid's own CRS to pick its mode
		let resolution = match self.reprojector.reproject_bbox(bbox, crs, pyramid.crs()) {
			Ok(projected) => {
				((projected.width() / f64::from(width)) * (projected.height() / f64::from(height))).sqrt()
			}
			Err(_) => (request.res_x() * request.res_y()).sqrt(),
		};
		let level = pyramid.best_level(resolution, false).ok_or_else(|| {
			ServiceError::not_found(format!("layer '{}' has no level for resolution {resolution}", layer.id))
		})?;

		let image = match level.mode() {
			GenerationMode::Stored => {
				let source = [Source::Pyramid(pyramid.clone())];
				synthesize(&request, &source, level.merge_method(), self.reprojector.as_ref())?
			}
			GenerationMode::OnDemand | GenerationMode::OnFly => {
				let mut image = synthesize(&request, level.sources(), level.merge_method(), self.reprojector.as_ref())?;
				if let Some(style) = pyramid.style() {
					image = style.apply(image)?;
				}
				image
			}
		};
		Ok(image)
	}

	fn get_map(&self, map: &GetMapRequest) -> Result<DataStream, ServiceError> {
		let format = OutputFormat::from_mime(&map.format)
			.map_err(|_| ServiceError::invalid_parameter("FORMAT", format!("'{}' is not offered", map.format)))?;
		if map.width == 0 || map.height == 0 || map.width > MAX_MAP_SIZE || map.height > MAX_MAP_SIZE {
			return Err(ServiceError::invalid_parameter(
				"WIDTH",
				format!("image size must be within 1..={MAX_MAP_SIZE}"),
			));
		}
		let crs = Crs::from_id(&map.crs);
		if !self.reprojector.handles(&crs, &crs) {
			return Err(ServiceError::new(
				ServiceErrorKind::Unsupported,
				format!("CRS '{}' is not supported", map.crs),
			));
		}

		let mut images = Vec::new();
		for id in &map.layers {
			let layer = self.layer(id)?;
			images.push(self.layer_image(layer, &map.bbox, &crs, map.width, map.height)?);
		}
		let image: SharedImage = if images.len() == 1 {
			images.pop().expect("one image")
		} else {
			// layers stack bottom-up with classic alpha compositing
			Arc::new(
				rok4_image::MergeImage::new(
					images,
					rok4_image::MergeMethod::AlphaTop,
					self.layer(&map.layers[0])?.pyramid.channels(),
					vec![255; 4],
					None,
				)
				.map_err(ServiceError::from)?,
			)
		};

		let body = encode_image(image.as_ref(), format).map_err(ServiceError::from)?;
		Ok(DataStream::ok(format.mime_type(), body))
	}

	fn get_tile(&self, tile: &GetTileRequest) -> Result<DataStream, ServiceError> {
		let layer = self.layer(&tile.layer)?;
		let pyramid = &layer.pyramid;
		if !tile.tile_matrix_set.is_empty() && tile.tile_matrix_set != pyramid.tms().id() {
			return Err(ServiceError::invalid_parameter(
				"TILEMATRIXSET",
				format!("layer '{}' serves tile matrix set '{}'", layer.id, pyramid.tms().id()),
			));
		}
		let level = pyramid.level(&tile.tile_matrix).ok_or_else(|| {
			ServiceError::not_found(format!("layer '{}' has no level '{}'", layer.id, tile.tile_matrix))
		})?;

		let stored_mime = pyramid.format().mime_type();
		let (col, row) = (tile.tile_col, tile.tile_row);

		// outside the published range: the canonical nodata tile
		if !level.tile_in_range(col, row) {
			let body = level.nodata_tile().encoded().map_err(ServiceError::from)?;
			return Ok(DataStream::ok(stored_mime, body));
		}

		match level.mode() {
			GenerationMode::Stored => self.stored_tile_stream(layer, level, tile, col, row),
			GenerationMode::OnDemand => self.synthesized_tile_stream(layer, level, tile, col, row),
			GenerationMode::OnFly => {
				if self.onfly.slab_ready(level, col, row) {
					return self.stored_tile_stream(layer, level, tile, col, row);
				}
				if !self.onfly.slab_blocked(level, col, row) {
					self.onfly.trigger(pyramid, level, col, row);
				}
				self.synthesized_tile_stream(layer, level, tile, col, row)
			}
		}
	}

	/// Serves the encoded stored tile verbatim; storage or codec trouble
	/// degrades to the level's nodata tile.
	fn stored_tile_stream(
		&self,
		layer: &Arc<Layer>,
		level: &Arc<Level>,
		tile: &GetTileRequest,
		col: u32,
		row: u32,
	) -> Result<DataStream, ServiceError> {
		let stored_mime = layer.pyramid.format().mime_type();
		if let Some(format) = &tile.format {
			if format != stored_mime {
				return Err(ServiceError::invalid_parameter(
					"FORMAT",
					format!("layer '{}' stores '{stored_mime}' tiles", layer.id),
				));
			}
		}
		match level.stored_tile(col, row) {
			Ok(body) => Ok(DataStream::ok(stored_mime, body)),
			Err(error) => {
				log::warn!(
					"stored tile ({col}, {row}) of layer '{}' level '{}' unreadable, serving nodata: {error:#}",
					layer.id,
					level.id()
				);
				let body = level.nodata_tile().encoded().map_err(ServiceError::from)?;
				Ok(DataStream::ok(stored_mime, body))
			}
		}
	}

	/// Synthesizes a single tile through the level's source list.
	fn synthesized_tile_stream(
		&self,
		layer: &Arc<Layer>,
		level: &Arc<Level>,
		tile: &GetTileRequest,
		col: u32,
		row: u32,
	) -> Result<DataStream, ServiceError> {
		let pyramid = &layer.pyramid;
		let matrix = level.matrix();
		let bbox = matrix.tile_bbox(col, row);
		let request = SynthesisRequest {
			bbox,
			width: matrix.tile_width,
			height: matrix.tile_height,
			crs: pyramid.crs().clone(),
			channels: pyramid.channels(),
			sample_format: pyramid.format().sample_format,
			nodata: pyramid.nodata().to_vec(),
			kernel: Kernel::Cubic,
		};
		let mut image = synthesize(&request, level.sources(), level.merge_method(), self.reprojector.as_ref())
			.map_err(ServiceError::from)?;
		if let Some(style) = pyramid.style() {
			image = style.apply(image).map_err(ServiceError::from)?;
		}

		let mime = tile.format.clone().unwrap_or_else(|| pyramid.format().mime_type().to_string());
		let format = OutputFormat::from_mime(&mime)
			.map_err(|_| ServiceError::invalid_parameter("FORMAT", format!("'{mime}' is not offered")))?;
		let body = encode_image(image.as_ref(), format).map_err(ServiceError::from)?;
		Ok(DataStream::ok(format.mime_type(), body))
	}

	fn get_feature_info(&self, info: &GetFeatureInfoRequest) -> Result<DataStream, ServiceError> {
		let map = &info.map;
		let layer_id = info
			.query_layers
			.first()
			.ok_or_else(|| ServiceError::missing_parameter("QUERY_LAYERS"))?;
		let layer = self.layer(layer_id)?;

		// proxy mode: the layer delegates feature info to an upstream WMS
		if let Some(url) = &layer.feature_info_url {
			return proxy_feature_info(url, info);
		}

		if info.i >= map.width || info.j >= map.height {
			return Err(ServiceError::invalid_parameter("I", "pixel outside the map"));
		}
		if info.info_format != "text/plain" && info.info_format != "application/json" {
			return Err(ServiceError::new(
				ServiceErrorKind::Unsupported,
				format!("info format '{}' is not supported", info.info_format),
			));
		}

		// the bbox of the clicked pixel, queried as a 1x1 image
		let res_x = map.bbox.width() / f64::from(map.width);
		let res_y = map.bbox.height() / f64::from(map.height);
		let bbox = BBox {
			xmin: map.bbox.xmin + f64::from(info.i) * res_x,
			xmax: map.bbox.xmin + f64::from(info.i + 1) * res_x,
			ymax: map.bbox.ymax - f64::from(info.j) * res_y,
			ymin: map.bbox.ymax - f64::from(info.j + 1) * res_y,
		};
		let crs = Crs::from_id(&map.crs);
		let image = self.layer_image(layer, &bbox, &crs, 1, 1)?;
		let mut samples = vec![0f32; image.meta().line_len()];
		image.read_line_f32(0, &mut samples).map_err(ServiceError::from)?;
		// report native units for integer data
		if !image.meta().sample_format().is_float() {
			let max = image.meta().sample_format().max_value() as f32;
			for sample in &mut samples {
				*sample *= max;
			}
		}

		let body = if info.info_format == "application/json" {
			let values: Vec<String> = samples.iter().map(|v| format!("{v}")).collect();
			format!("{{\"layer\":\"{layer_id}\",\"values\":[{}]}}\n", values.join(","))
		} else {
			let values: Vec<String> = samples
				.iter()
				.enumerate()
				.map(|(band, v)| format!("band {band} = {v}"))
				.collect();
			format!("layer {layer_id}\n{}\n", values.join("\n"))
		};
		Ok(DataStream::ok(&info.info_format, Blob::from(body)))
	}
}

/// Forwards a GetFeatureInfo to the configured upstream and relays its
/// answer.
fn proxy_feature_info(url: &str, info: &GetFeatureInfoRequest) -> Result<DataStream, ServiceError> {
	let map = &info.map;
	let full_url = format!(
		"{url}?SERVICE=WMS&REQUEST=GetFeatureInfo&VERSION={}&LAYERS={}&QUERY_LAYERS={}&CRS={}&BBOX={},{},{},{}&WIDTH={}&HEIGHT={}&I={}&J={}&INFO_FORMAT={}&FORMAT={}&STYLES=",
		map.version,
		map.layers.join(","),
		info.query_layers.join(","),
		map.crs,
		map.bbox.xmin,
		map.bbox.ymin,
		map.bbox.xmax,
		map.bbox.ymax,
		map.width,
		map.height,
		info.i,
		info.j,
		info.info_format,
		map.format,
	);
	let response = reqwest::blocking::get(&full_url)
		.map_err(|e| ServiceError::new(ServiceErrorKind::Io, format!("feature info upstream failed: {e}")))?;
	let status = response.status().as_u16();
	let content_type = response
		.headers()
		.get("content-type")
		.and_then(|v| v.to_str().ok())
		.unwrap_or("application/octet-stream")
		.to_string();
	let body = response
		.bytes()
		.map_err(|e| ServiceError::new(ServiceErrorKind::Io, format!("feature info body failed: {e}")))?;
	Ok(DataStream {
		status,
		content_type,
		body: Blob::from(body.to_vec()),
	})
}
