//! Typed request parameters, parsed from protocol key/value pairs.
//!
//! WMS and WMTS share the KVP convention (`SERVICE`, `REQUEST`, then
//! operation-specific keys, all case-insensitive on the key side); TMS
//! addresses tiles by path. Parsing failures carry the OGC parameter
//! semantics: absent mandatory key answers `MissingParameterValue`,
//! malformed value `InvalidParameterValue`.

use rok4_core::crs::Crs;
use rok4_core::error::ServiceError;
use rok4_core::types::BBox;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct GetMapRequest {
	pub layers: Vec<String>,
	pub styles: Vec<String>,
	pub crs: String,
	pub bbox: BBox,
	pub width: u32,
	pub height: u32,
	pub format: String,
	pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetTileRequest {
	pub layer: String,
	pub tile_matrix_set: String,
	pub tile_matrix: String,
	pub tile_col: u32,
	pub tile_row: u32,
	pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetFeatureInfoRequest {
	pub map: GetMapRequest,
	pub query_layers: Vec<String>,
	pub i: u32,
	pub j: u32,
	pub info_format: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRequest {
	WmsGetCapabilities,
	WmtsGetCapabilities,
	GetMap(GetMapRequest),
	GetTile(GetTileRequest),
	GetFeatureInfo(GetFeatureInfoRequest),
}

/// Key/value parameters with case-insensitive keys.
pub struct Parameters(HashMap<String, String>);

impl Parameters {
	pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Parameters {
		Parameters(pairs.into_iter().map(|(k, v)| (k.to_uppercase(), v)).collect())
	}

	fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	fn require(&self, key: &str) -> Result<&str, ServiceError> {
		self.get(key).ok_or_else(|| ServiceError::missing_parameter(key))
	}

	fn require_u32(&self, key: &str) -> Result<u32, ServiceError> {
		self
			.require(key)?
			.parse()
			.map_err(|_| ServiceError::invalid_parameter(key, format!("'{}' is not a positive integer", self.get(key).unwrap_or(""))))
	}
}

impl ParsedRequest {
	/// Parses a WMS KVP request.
	pub fn from_wms(params: &Parameters) -> Result<ParsedRequest, ServiceError> {
		let service = params.require("SERVICE")?;
		if !service.eq_ignore_ascii_case("WMS") {
			return Err(ServiceError::invalid_parameter("SERVICE", format!("'{service}' is not WMS")));
		}
		match params.require("REQUEST")? {
			r if r.eq_ignore_ascii_case("GetCapabilities") => Ok(ParsedRequest::WmsGetCapabilities),
			r if r.eq_ignore_ascii_case("GetMap") => Ok(ParsedRequest::GetMap(parse_get_map(params)?)),
			r if r.eq_ignore_ascii_case("GetFeatureInfo") => {
				let map = parse_get_map(params)?;
				let query_layers = split_list(params.require("QUERY_LAYERS")?);
				Ok(ParsedRequest::GetFeatureInfo(GetFeatureInfoRequest {
					map,
					query_layers,
					i: params.require_u32("I").or_else(|_| params.require_u32("X"))?,
					j: params.require_u32("J").or_else(|_| params.require_u32("Y"))?,
					info_format: params.get("INFO_FORMAT").unwrap_or("text/plain").to_string(),
				}))
			}
			other => Err(ServiceError::new(
				rok4_core::error::ServiceErrorKind::Unsupported,
				format!("operation '{other}' is not supported"),
			)),
		}
	}

	/// Parses a WMTS KVP request.
	pub fn from_wmts(params: &Parameters) -> Result<ParsedRequest, ServiceError> {
		let service = params.require("SERVICE")?;
		if !service.eq_ignore_ascii_case("WMTS") {
			return Err(ServiceError::invalid_parameter("SERVICE", format!("'{service}' is not WMTS")));
		}
		match params.require("REQUEST")? {
			r if r.eq_ignore_ascii_case("GetCapabilities") => Ok(ParsedRequest::WmtsGetCapabilities),
			r if r.eq_ignore_ascii_case("GetTile") => Ok(ParsedRequest::GetTile(GetTileRequest {
				layer: params.require("LAYER")?.to_string(),
				tile_matrix_set: params.require("TILEMATRIXSET")?.to_string(),
				tile_matrix: params.require("TILEMATRIX")?.to_string(),
				tile_col: params.require_u32("TILECOL")?,
				tile_row: params.require_u32("TILEROW")?,
				format: params.get("FORMAT").map(str::to_string),
			})),
			other => Err(ServiceError::new(
				rok4_core::error::ServiceErrorKind::Unsupported,
				format!("operation '{other}' is not supported"),
			)),
		}
	}

	/// Parses a TMS tile path: `<layer>/<matrix>/<col>/<row>.<ext>`.
	/// TMS counts rows from the bottom; the caller flips them against the
	/// matrix height once the layer is resolved.
	pub fn from_tms_path(layer: &str, matrix: &str, col: &str, row_ext: &str) -> Result<ParsedRequest, ServiceError> {
		let (row, extension) = row_ext
			.rsplit_once('.')
			.ok_or_else(|| ServiceError::invalid_parameter("path", "tile path must end in .<format>"))?;
		let parse = |name: &str, value: &str| -> Result<u32, ServiceError> {
			value
				.parse()
				.map_err(|_| ServiceError::invalid_parameter(name, format!("'{value}' is not a positive integer")))
		};
		let format = match extension {
			"png" => "image/png",
			"jpg" | "jpeg" => "image/jpeg",
			"tif" | "tiff" => "image/tiff",
			other => {
				return Err(ServiceError::invalid_parameter(
					"path",
					format!("unknown tile extension '{other}'"),
				));
			}
		};
		Ok(ParsedRequest::GetTile(GetTileRequest {
			layer: layer.to_string(),
			tile_matrix_set: String::new(),
			tile_matrix: matrix.to_string(),
			tile_col: parse("col", col)?,
			tile_row: parse("row", row)?,
			format: Some(format.to_string()),
		}))
	}
}

fn split_list(value: &str) -> Vec<String> {
	value.split(',').map(str::to_string).collect()
}

fn parse_get_map(params: &Parameters) -> Result<GetMapRequest, ServiceError> {
	let version = params.get("VERSION").unwrap_or("1.3.0").to_string();
	let crs_key = if version.starts_with("1.3") { "CRS" } else { "SRS" };
	let crs = params.require(crs_key)?.to_string();

	let bbox_raw = params.require("BBOX")?;
	let numbers: Vec<f64> = bbox_raw.split(',').filter_map(|v| v.parse().ok()).collect();
	if numbers.len() != 4 {
		return Err(ServiceError::invalid_parameter(
			"BBOX",
			format!("'{bbox_raw}' is not four comma-separated numbers"),
		));
	}
	// WMS 1.3.0 transmits lat/lon ordered bboxes for geographic CRSs
	let swap = version.starts_with("1.3") && Crs::from_id(&crs).is_latlon_order();
	let [a, b, c, d] = [numbers[0], numbers[1], numbers[2], numbers[3]];
	let (xmin, ymin, xmax, ymax) = if swap { (b, a, d, c) } else { (a, b, c, d) };
	let bbox = BBox::new(xmin, ymin, xmax, ymax)
		.map_err(|e| ServiceError::invalid_parameter("BBOX", format!("degenerate bbox: {e}")))?;

	let styles = params.get("STYLES").unwrap_or("").to_string();

	Ok(GetMapRequest {
		layers: split_list(params.require("LAYERS")?),
		styles: styles.split(',').map(str::to_string).collect(),
		crs,
		bbox,
		width: params.require_u32("WIDTH")?,
		height: params.require_u32("HEIGHT")?,
		format: params.require("FORMAT")?.to_string(),
		version,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use rok4_core::error::ServiceErrorKind;

	fn params(pairs: &[(&str, &str)]) -> Parameters {
		Parameters::new(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())))
	}

	#[test]
	fn get_map_parses() {
		let request = ParsedRequest::from_wms(&params(&[
			("service", "WMS"),
			("request", "GetMap"),
			("version", "1.3.0"),
			("layers", "ortho,dem"),
			("crs", "EPSG:3857"),
			("bbox", "0,10,100,200"),
			("width", "256"),
			("height", "512"),
			("format", "image/png"),
		]))
		.unwrap();
		let ParsedRequest::GetMap(map) = request else {
			panic!("wrong variant")
		};
		assert_eq!(map.layers, vec!["ortho", "dem"]);
		assert_eq!(map.bbox, BBox::new(0.0, 10.0, 100.0, 200.0).unwrap());
		assert_eq!(map.height, 512);
	}

	#[test]
	fn get_map_130_swaps_latlon_bbox() {
		let request = ParsedRequest::from_wms(&params(&[
			("SERVICE", "WMS"),
			("REQUEST", "GetMap"),
			("VERSION", "1.3.0"),
			("LAYERS", "ortho"),
			("CRS", "EPSG:4326"),
			("BBOX", "45,2,46,3"),
			("WIDTH", "256"),
			("HEIGHT", "256"),
			("FORMAT", "image/jpeg"),
		]))
		.unwrap();
		let ParsedRequest::GetMap(map) = request else {
			panic!("wrong variant")
		};
		assert_eq!(map.bbox, BBox::new(2.0, 45.0, 3.0, 46.0).unwrap());
	}

	#[test]
	fn missing_mandatory_parameter() {
		let error = ParsedRequest::from_wms(&params(&[("SERVICE", "WMS"), ("REQUEST", "GetMap")])).unwrap_err();
		assert_eq!(error.kind(), ServiceErrorKind::MissingParameter);
	}

	#[test]
	fn malformed_width() {
		let error = ParsedRequest::from_wms(&params(&[
			("SERVICE", "WMS"),
			("REQUEST", "GetMap"),
			("LAYERS", "a"),
			("CRS", "EPSG:3857"),
			("BBOX", "0,0,1,1"),
			("WIDTH", "lots"),
			("HEIGHT", "256"),
			("FORMAT", "image/png"),
		]))
		.unwrap_err();
		assert_eq!(error.kind(), ServiceErrorKind::InvalidParameter);
		assert_eq!(error.locator(), Some("WIDTH"));
	}

	#[test]
	fn unsupported_operation() {
		let error =
			ParsedRequest::from_wms(&params(&[("SERVICE", "WMS"), ("REQUEST", "GetStyles")])).unwrap_err();
		assert_eq!(error.kind(), ServiceErrorKind::Unsupported);
	}

	#[test]
	fn wmts_get_tile_parses() {
		let request = ParsedRequest::from_wmts(&params(&[
			("SERVICE", "WMTS"),
			("REQUEST", "GetTile"),
			("LAYER", "ortho"),
			("TILEMATRIXSET", "PM"),
			("TILEMATRIX", "10"),
			("TILECOL", "512"),
			("TILEROW", "356"),
			("FORMAT", "image/jpeg"),
		]))
		.unwrap();
		let ParsedRequest::GetTile(tile) = request else {
			panic!("wrong variant")
		};
		assert_eq!((tile.tile_col, tile.tile_row), (512, 356));
		assert_eq!(tile.tile_matrix, "10");
	}

	#[test]
	fn tms_path_parses() {
		let request = ParsedRequest::from_tms_path("ortho", "10", "512", "356.jpg").unwrap();
		let ParsedRequest::GetTile(tile) = request else {
			panic!("wrong variant")
		};
		assert_eq!(tile.format.as_deref(), Some("image/jpeg"));
		assert_eq!(tile.tile_row, 356);
	}

	#[test]
	fn tms_unknown_extension() {
		assert!(ParsedRequest::from_tms_path("ortho", "10", "512", "356.gif").is_err());
	}
}
