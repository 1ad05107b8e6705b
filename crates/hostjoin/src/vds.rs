//! Node-local hypervisor control client.
//!
//! The hypervisor control service runs next to this process and reports
//! the node's live network layout (bridge/VLAN assignments), its CPU
//! model, and resource statistics. The join flow only ever reads from
//! it; network configuration is owned by other tooling.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Default hypervisor control endpoint.
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:54321";

/// Default timeout for local control calls.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors from the hypervisor control service.
#[derive(Error, Debug)]
pub enum VdsError {
    /// The service could not be reached.
    #[error("hypervisor control service unreachable: {0}")]
    Connection(String),

    /// The service answered with a non-zero status code.
    #[error("hypervisor control error {code}: {message}")]
    Remote { code: i32, message: String },

    /// The service answered with a payload we could not decode.
    #[error("unexpected hypervisor payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Live network and CPU capabilities of the node.
#[derive(Debug, Clone, Deserialize)]
pub struct VdsCapabilities {
    /// Bridge port name -> VLAN id, for vlanned interfaces only.
    #[serde(default)]
    pub vlans: HashMap<String, u16>,
    /// CPU model identifier as the engine expects it.
    pub cpu_model: String,
}

/// Resource statistics of the node.
#[derive(Debug, Clone, Deserialize)]
pub struct VdsStats {
    /// Memory available for guest allocation, in MB.
    pub mem_available_mb: u64,
}

/// Hypervisor control client interface.
#[async_trait]
pub trait VdsClient: Send + Sync {
    /// Report network/VLAN layout and the detected CPU model.
    async fn capabilities(&self) -> Result<VdsCapabilities, VdsError>;

    /// Report resource statistics (available memory).
    async fn stats(&self) -> Result<VdsStats, VdsError>;
}

/// Wire envelope: every reply carries a status block and a payload.
#[derive(Debug, Deserialize)]
struct VdsResponse<T> {
    status: VdsStatus,
    info: Option<T>,
}

#[derive(Debug, Deserialize)]
struct VdsStatus {
    code: i32,
    message: String,
}

/// HTTP client for the local hypervisor control service.
///
/// The service restarts when the engine redeploys the host mid-join, so
/// each call transparently rebuilds the connection once before giving
/// up.
pub struct LocalVds {
    base_url: String,
    client: tokio::sync::Mutex<reqwest::Client>,
    timeout: Duration,
}

impl LocalVds {
    /// Create a client for the default local endpoint.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, VdsError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client for a specific endpoint.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, VdsError> {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        let client = Self::build_client(timeout)?;
        Ok(Self {
            base_url: base_url.into(),
            client: tokio::sync::Mutex::new(client),
            timeout,
        })
    }

    fn build_client(timeout: Duration) -> Result<reqwest::Client, VdsError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VdsError::Connection(e.to_string()))
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, VdsError> {
        match self.call_once(path).await {
            Err(VdsError::Connection(reason)) => {
                // The control service restarts during host deployment.
                warn!(path, %reason, "hypervisor control connection lost, reconnecting");
                let rebuilt = Self::build_client(self.timeout)?;
                *self.client.lock().await = rebuilt;
                self.call_once(path).await
            }
            other => other,
        }
    }

    async fn call_once<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, VdsError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "hypervisor control request");
        let client = self.client.lock().await.clone();
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| VdsError::Connection(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| VdsError::Connection(e.to_string()))?;
        let envelope: VdsResponse<T> = serde_json::from_str(&body)?;
        if envelope.status.code != 0 {
            return Err(VdsError::Remote {
                code: envelope.status.code,
                message: envelope.status.message,
            });
        }
        envelope.info.ok_or_else(|| VdsError::Remote {
            code: envelope.status.code,
            message: "reply carried no payload".into(),
        })
    }
}

#[async_trait]
impl VdsClient for LocalVds {
    async fn capabilities(&self) -> Result<VdsCapabilities, VdsError> {
        self.call("/capabilities").await
    }

    async fn stats(&self) -> Result<VdsStats, VdsError> {
        self.call("/stats").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_decoding() {
        let body = r#"{
            "status": {"code": 0, "message": "OK"},
            "info": {"vlans": {"em1": 42}, "cpu_model": "model_SandyBridge"}
        }"#;
        let envelope: VdsResponse<VdsCapabilities> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.status.code, 0);
        let caps = envelope.info.unwrap();
        assert_eq!(caps.vlans.get("em1"), Some(&42));
        assert_eq!(caps.cpu_model, "model_SandyBridge");
    }

    #[test]
    fn test_error_status_is_surfaced() {
        let body = r#"{"status": {"code": 99, "message": "internal error"}}"#;
        let envelope: VdsResponse<VdsStats> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.status.code, 99);
        assert!(envelope.info.is_none());
    }
}
