//! HTTP transport for recording uploads.

use crate::config::UploadConfig;
use crate::error::{PendantError, Result};
use crate::upload::{NetworkClient, UploadMeta, UploadResponse};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Uploads over plain HTTP POST.
///
/// Reachability is probed with a bare TCP connect to the endpoint host,
/// which is cheap enough to run between files in a batch.
#[derive(Debug)]
pub struct HttpNetwork {
    client: reqwest::blocking::Client,
    url: reqwest::Url,
}

impl HttpNetwork {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            PendantError::ConfigInvalidValue {
                key: "upload.endpoint".to_string(),
                message: e.to_string(),
            }
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| PendantError::UploadTransport {
                message: e.to_string(),
            })?;

        Ok(Self { client, url })
    }

    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}

impl NetworkClient for HttpNetwork {
    fn is_connected(&self) -> bool {
        let Some(host) = self.url.host_str() else {
            return false;
        };
        let Some(port) = self.url.port_or_known_default() else {
            return false;
        };
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            return false;
        };

        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_ok())
    }

    fn post_file(&self, meta: &UploadMeta<'_>, bytes: &[u8]) -> Result<UploadResponse> {
        let response = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "audio/wav")
            .header("X-Device-ID", meta.device_id)
            .header("X-Timestamp", meta.timestamp.to_string())
            .header("X-Filename", meta.filename)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| PendantError::UploadTransport {
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(UploadResponse { status, body })
    }
}
