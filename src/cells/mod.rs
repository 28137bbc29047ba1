//! HTTP clients for the i2b2 cells.
//!
//! The PM cell answers user information requests and the CRC cell runs
//! queries and returns patient sets. Both speak JSON over POST.

pub mod crc;
pub mod pm;

pub use crc::CrcCellClient;
pub use pm::PmCellClient;

use crate::error::{GatewayError, Service};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// JSON-over-HTTP client bound to one service and one timeout.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    service: Service,
    base_url: String,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl JsonClient {
    pub(crate) fn new(
        service: Service,
        base_url: &str,
        timeout_seconds: u64,
    ) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            http_client,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `body` to `{base_url}/{path}` and decode the JSON answer.
    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {} ({})", url, self.service);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::timeout(self.service, self.timeout_seconds)
                } else if e.is_connect() {
                    GatewayError::transport(self.service, format!("cannot connect to {}", self.base_url))
                } else {
                    GatewayError::transport(self.service, format!("failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {}: {}", status, body);
            return Err(if status.is_server_error() {
                GatewayError::transport(self.service, message)
            } else {
                GatewayError::service(self.service, message)
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::service(self.service, format!("failed to parse response: {}", e)))
    }
}
