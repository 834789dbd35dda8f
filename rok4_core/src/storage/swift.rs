//! Swift-style HTTP object storage.
//!
//! Speaks the plain `GET/PUT/HEAD/DELETE <endpoint>/<container>/<key>`
//! contract with token-header authentication. Range reads use standard HTTP
//! `Range` headers. Exclusive creation maps to `If-None-Match: *`, which the
//! store answers with 412 when the object already exists.

use super::StorageContext;
use crate::types::{Blob, ByteRange};
use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::time::Duration;

#[derive(Debug)]
pub struct SwiftContext {
	endpoint: String,
	container: String,
	token: Option<String>,
	client: Client,
}

impl SwiftContext {
	pub fn new(endpoint: &str, container: &str, token: Option<&str>, timeout_secs: u64) -> Result<SwiftContext> {
		let client = Client::builder()
			.timeout(Duration::from_secs(timeout_secs))
			.build()
			.context("building swift http client")?;
		Ok(SwiftContext {
			endpoint: endpoint.trim_end_matches('/').to_string(),
			container: container.to_string(),
			token: token.map(str::to_string),
			client,
		})
	}

	fn url(&self, key: &str) -> String {
		format!("{}/{}/{}", self.endpoint, self.container, key)
	}

	fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
		match &self.token {
			Some(token) => builder.header("X-Auth-Token", token),
			None => builder,
		}
	}
}

impl StorageContext for SwiftContext {
	fn container(&self) -> &str {
		&self.container
	}

	fn read(&self, key: &str) -> Result<Blob> {
		let response = self
			.request(self.client.get(self.url(key)))
			.send()
			.with_context(|| format!("GET {}", self.url(key)))?;
		if !response.status().is_success() {
			bail!("GET {} answered {}", self.url(key), response.status());
		}
		Ok(Blob::from(response.bytes()?.to_vec()))
	}

	fn read_range(&self, key: &str, range: &ByteRange) -> Result<Blob> {
		let header = format!("bytes={}-{}", range.offset, range.end() - 1);
		let response = self
			.request(self.client.get(self.url(key)))
			.header("Range", header)
			.send()
			.with_context(|| format!("GET {}", self.url(key)))?;
		if !response.status().is_success() {
			bail!("ranged GET {} answered {}", self.url(key), response.status());
		}
		let bytes = response.bytes()?;
		if bytes.len() as u64 != range.length {
			bail!(
				"ranged GET {} returned {} bytes instead of {}",
				self.url(key),
				bytes.len(),
				range.length
			);
		}
		Ok(Blob::from(bytes.to_vec()))
	}

	fn write(&self, key: &str, data: &Blob) -> Result<()> {
		let response = self
			.request(self.client.put(self.url(key)))
			.body(data.as_slice().to_vec())
			.send()
			.with_context(|| format!("PUT {}", self.url(key)))?;
		if !response.status().is_success() {
			bail!("PUT {} answered {}", self.url(key), response.status());
		}
		Ok(())
	}

	fn exists(&self, key: &str) -> bool {
		self
			.request(self.client.head(self.url(key)))
			.send()
			.map(|r| r.status().is_success())
			.unwrap_or(false)
	}

	fn remove(&self, key: &str) -> Result<()> {
		let response = self
			.request(self.client.delete(self.url(key)))
			.send()
			.with_context(|| format!("DELETE {}", self.url(key)))?;
		if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
			bail!("DELETE {} answered {}", self.url(key), response.status());
		}
		Ok(())
	}

	fn create_exclusive(&self, key: &str) -> Result<bool> {
		let response = self
			.request(self.client.put(self.url(key)))
			.header("If-None-Match", "*")
			.body(Vec::new())
			.send()
			.with_context(|| format!("exclusive PUT {}", self.url(key)))?;
		if response.status() == StatusCode::PRECONDITION_FAILED {
			return Ok(false);
		}
		if !response.status().is_success() {
			bail!("exclusive PUT {} answered {}", self.url(key), response.status());
		}
		Ok(true)
	}
}
