//! HTTP surface over the serving core.
//!
//! Three routes, one per protocol: `/wms` and `/wmts` take classic KVP
//! query strings, `/tms/1.0.0/<layer>/<matrix>/<col>/<row>.<ext>` addresses
//! tiles by path (rows counted from the bottom, per the TMS convention).
//! Handlers translate to [`ParsedRequest`], run the core on the blocking
//! pool (the image graph evaluates synchronously, row by row) and write the
//! resulting [`DataStream`] back.

use super::core::ServerCore;
use super::data_stream::DataStream;
use super::exception::exception_stream;
use super::request::{Parameters, ParsedRequest};
use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use rok4_core::error::ServiceError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;

fn to_response(stream: DataStream) -> Response {
	Response::builder()
		.status(StatusCode::from_u16(stream.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
		.header(CONTENT_TYPE, stream.content_type)
		.body(Body::from(stream.body.into_vec()))
		.expect("static response parts are valid")
}

async fn run_core(core: Arc<ServerCore>, parsed: Result<ParsedRequest, ServiceError>) -> Response {
	let stream = match parsed {
		Err(error) => exception_stream(&error),
		Ok(request) => {
			// a request is evaluated synchronously, on one worker thread
			tokio::task::spawn_blocking(move || core.handle(&request))
				.await
				.unwrap_or_else(|join_error| {
					exception_stream(&ServiceError::new(
						rok4_core::error::ServiceErrorKind::Io,
						format!("request evaluation failed: {join_error}"),
					))
				})
		}
	};
	to_response(stream)
}

async fn wms_handler(State(core): State<Arc<ServerCore>>, Query(query): Query<HashMap<String, String>>) -> Response {
	let parsed = ParsedRequest::from_wms(&Parameters::new(query));
	run_core(core, parsed).await
}

async fn wmts_handler(State(core): State<Arc<ServerCore>>, Query(query): Query<HashMap<String, String>>) -> Response {
	let parsed = ParsedRequest::from_wmts(&Parameters::new(query));
	run_core(core, parsed).await
}

async fn tms_handler(
	State(core): State<Arc<ServerCore>>,
	Path((layer, matrix, col, row_ext)): Path<(String, String, String, String)>,
) -> Response {
	let parsed = ParsedRequest::from_tms_path(&layer, &matrix, &col, &row_ext).and_then(|request| {
		// TMS rows grow northward: flip against the matrix height
		match request {
			ParsedRequest::GetTile(mut tile) => {
				let layer = core.layer(&tile.layer)?;
				let level = layer
					.pyramid
					.level(&tile.tile_matrix)
					.ok_or_else(|| ServiceError::not_found(format!("no level '{}'", tile.tile_matrix)))?;
				let height = level.matrix().matrix_height;
				if tile.tile_row >= height {
					return Err(ServiceError::invalid_parameter("row", "tile row outside the matrix"));
				}
				tile.tile_row = height - 1 - tile.tile_row;
				Ok(ParsedRequest::GetTile(tile))
			}
			other => Ok(other),
		}
	});
	run_core(core, parsed).await
}

pub fn router(core: Arc<ServerCore>) -> Router {
	Router::new()
		.route("/wms", get(wms_handler))
		.route("/wmts", get(wmts_handler))
		.route("/tms/1.0.0/{layer}/{matrix}/{col}/{row_ext}", get(tms_handler))
		.with_state(core)
}

/// Binds and serves until ctrl-c.
pub async fn serve(core: Arc<ServerCore>, ip: &str, port: u16) -> Result<()> {
	let address = format!("{ip}:{port}");
	let listener = TcpListener::bind(&address)
		.await
		.with_context(|| format!("binding {address}"))?;
	log::info!("serving WMS/WMTS/TMS on http://{address}");
	axum::serve(listener, router(core))
		.with_graceful_shutdown(async {
			tokio::signal::ctrl_c().await.ok();
			log::info!("shutting down");
		})
		.await
		.context("serving")
}
