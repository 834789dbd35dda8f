//! Service error taxonomy.
//!
//! Internals use `anyhow` freely; at the serving boundary every failure is
//! folded into a [`ServiceError`] so the transport adapter can map it to an
//! HTTP status and an OGC ServiceException code mechanically. Image-graph
//! nodes never surface errors through `read_line`: they substitute nodata
//! and log, per the pipeline contract.

use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
	/// Storage read/write failure.
	Io,
	/// Encoder or decoder failure on a tile or image.
	Codec,
	/// Sample format / channels / bits that no converter can adapt.
	Format,
	/// Declared metadata contradicts the file header.
	Geometry,
	/// Layer, tile matrix or tile out of range.
	NotFound,
	InvalidParameter,
	MissingParameter,
	/// Operation, output format or CRS not supported.
	Unsupported,
	/// A stored tile is shorter than its declared byte count.
	CorruptTile,
	/// Upstream or worker wallclock timeout.
	Timeout,
}

#[derive(Debug)]
pub struct ServiceError {
	kind: ServiceErrorKind,
	/// OGC `locator` attribute: the parameter or object at fault.
	locator: Option<String>,
	message: String,
}

impl ServiceError {
	pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> ServiceError {
		ServiceError {
			kind,
			locator: None,
			message: message.into(),
		}
	}

	pub fn with_locator(kind: ServiceErrorKind, locator: &str, message: impl Into<String>) -> ServiceError {
		ServiceError {
			kind,
			locator: Some(locator.to_string()),
			message: message.into(),
		}
	}

	pub fn missing_parameter(name: &str) -> ServiceError {
		Self::with_locator(
			ServiceErrorKind::MissingParameter,
			name,
			format!("mandatory parameter {name} is missing"),
		)
	}

	pub fn invalid_parameter(name: &str, message: impl Into<String>) -> ServiceError {
		Self::with_locator(ServiceErrorKind::InvalidParameter, name, message)
	}

	pub fn not_found(message: impl Into<String>) -> ServiceError {
		Self::new(ServiceErrorKind::NotFound, message)
	}

	pub fn kind(&self) -> ServiceErrorKind {
		self.kind
	}

	pub fn locator(&self) -> Option<&str> {
		self.locator.as_deref()
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn http_status(&self) -> u16 {
		use ServiceErrorKind::*;
		match self.kind {
			NotFound => 404,
			InvalidParameter | MissingParameter | Unsupported => 400,
			Io | Codec | Format | Geometry | CorruptTile | Timeout => 500,
		}
	}

	/// OGC ServiceException code.
	pub fn ogc_code(&self) -> &'static str {
		use ServiceErrorKind::*;
		match self.kind {
			MissingParameter => "MissingParameterValue",
			InvalidParameter => "InvalidParameterValue",
			Unsupported => "OperationNotSupported",
			NotFound => "LayerNotDefined",
			_ => "NoApplicableCode",
		}
	}
}

impl Display for ServiceError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.locator {
			Some(locator) => write!(f, "{:?} [{locator}]: {}", self.kind, self.message),
			None => write!(f, "{:?}: {}", self.kind, self.message),
		}
	}
}

impl std::error::Error for ServiceError {}

impl From<anyhow::Error> for ServiceError {
	fn from(error: anyhow::Error) -> Self {
		match error.downcast::<ServiceError>() {
			Ok(service) => service,
			Err(other) => ServiceError::new(ServiceErrorKind::Io, format!("{other:#}")),
		}
	}
}
