//! HTTP plumbing shared by the provider connections.
//!
//! Connections are constructed without I/O; the underlying
//! [`reqwest::Client`] is only built on first use through [`LazyClient`].

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine;
use serde_json::Value;

use crate::error::{ProviderError, Result};

/// Request timeout applied to every provider client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A `reqwest::Client` that is created on first access.
pub(crate) struct LazyClient {
    service: &'static str,
    cell: OnceLock<reqwest::Client>,
}

impl LazyClient {
    pub(crate) fn new(service: &'static str) -> Self {
        Self {
            service,
            cell: OnceLock::new(),
        }
    }

    /// Return the client, building it if needed.
    pub(crate) fn get(&self) -> Result<&reqwest::Client> {
        if let Some(client) = self.cell.get() {
            return Ok(client);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                service: self.service.to_owned(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        // A concurrent caller may have won the race; either client is fine.
        let _ = self.cell.set(client);
        tracing::info!(service = self.service, "connection initialized");

        self.cell.get().ok_or_else(|| ProviderError::RequestFailed {
            service: self.service.to_owned(),
            reason: "HTTP client unavailable".into(),
        })
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

/// Send a request and decode a JSON response body.
///
/// Non-success statuses become [`ProviderError::RequestFailed`] carrying the
/// response text.
pub(crate) async fn send_json(service: &str, request: reqwest::RequestBuilder) -> Result<Value> {
    let resp = request
        .send()
        .await
        .map_err(|e| ProviderError::RequestFailed {
            service: service.to_owned(),
            reason: e.to_string(),
        })?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| ProviderError::RequestFailed {
            service: service.to_owned(),
            reason: format!("failed to read response body: {e}"),
        })?;

    if !status.is_success() {
        return Err(ProviderError::RequestFailed {
            service: service.to_owned(),
            reason: format!("API returned {status}: {text}"),
        });
    }

    serde_json::from_str(&text).map_err(|e| ProviderError::ResponseParse {
        service: service.to_owned(),
        reason: format!("invalid JSON response: {e}"),
    })
}

/// Read an image from a local path or download it from an `http(s)` URL and
/// return it base64-encoded.
pub(crate) async fn image_base64(
    service: &str,
    client: &reqwest::Client,
    image: &str,
) -> Result<String> {
    let bytes = if is_remote(image) {
        let resp = client
            .get(image)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::RequestFailed {
                service: service.to_owned(),
                reason: format!("failed to download image {image}: {e}"),
            })?;
        resp.bytes()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                service: service.to_owned(),
                reason: format!("failed to read image {image}: {e}"),
            })?
            .to_vec()
    } else {
        tokio::fs::read(image)
            .await
            .map_err(|e| ProviderError::InvalidInput {
                reason: format!("cannot read image {image}: {e}"),
            })?
    };

    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Whether an image reference is a URL rather than a local path.
pub(crate) fn is_remote(image: &str) -> bool {
    image.starts_with("http://") || image.starts_with("https://")
}

/// Parse a JSON array of numbers into an embedding.
pub(crate) fn parse_embedding(service: &str, value: &Value) -> Result<Vec<f32>> {
    let items = value.as_array().ok_or_else(|| ProviderError::ResponseParse {
        service: service.to_owned(),
        reason: "missing embedding array in response".into(),
    })?;

    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| ProviderError::ResponseParse {
                    service: service.to_owned(),
                    reason: format!("non-numeric embedding value: {v}"),
                })
        })
        .collect()
}

/// Validate and normalize a base URL from connection settings.
pub(crate) fn parse_base_url(raw: &str) -> Result<url::Url> {
    let url = url::Url::parse(raw).map_err(|e| ProviderError::Config {
        reason: format!("invalid base URL `{raw}`: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProviderError::Config {
            reason: format!("unsupported URL scheme `{other}` in `{raw}`"),
        }),
    }
}

/// Join a base URL and an API path without doubling slashes.
pub(crate) fn endpoint(base: &url::Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
