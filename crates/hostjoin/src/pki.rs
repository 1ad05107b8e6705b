//! Engine PKI resource client.
//!
//! Fetches the engine's CA certificate and its signed SSH public key,
//! and validates a candidate CA against the live endpoint identity.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client};
use thiserror::Error;
use tracing::debug;

use crate::engine::TlsConfig;

/// Timeout for PKI resource fetches.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Errors while acquiring PKI material.
#[derive(Error, Debug)]
pub enum PkiError {
    /// The resource could not be fetched from the endpoint.
    #[error("cannot fetch {resource} from the engine: {reason}")]
    Fetch { resource: &'static str, reason: String },

    /// Local PKI material could not be read or parsed.
    #[error("invalid PKI material: {0}")]
    Material(String),
}

/// Source of engine PKI material.
#[async_trait]
pub trait PkiSource: Send + Sync {
    /// Fetch the CA certificate (PEM).
    ///
    /// When `custom_ca` points at an existing file, its content is used
    /// as-is; otherwise the endpoint's own issued CA is requested.
    async fn fetch_ca_certificate(&self, custom_ca: Option<&Path>) -> Result<String, PkiError>;

    /// Check whether the endpoint's live service identity validates
    /// against the CA stored at `ca_path`.
    async fn validate_ca(&self, ca_path: &Path) -> Result<bool, PkiError>;

    /// Fetch the engine-signed SSH public key for this node, over the
    /// given trust configuration.
    async fn fetch_ssh_key(&self, tls: &TlsConfig) -> Result<String, PkiError>;
}

/// HTTPS implementation against the engine's PKI resource service.
#[derive(Debug, Clone)]
pub struct HttpPkiSource {
    fqdn: String,
}

impl HttpPkiSource {
    /// Create a PKI source for the given engine FQDN.
    #[must_use]
    pub fn new(fqdn: impl Into<String>) -> Self {
        Self { fqdn: fqdn.into() }
    }

    fn resource_url(&self, resource: &str, format: &str) -> String {
        format!(
            "https://{}/engine/services/pki-resource?resource={resource}&format={format}",
            self.fqdn
        )
    }

    fn client(tls: &TlsConfig) -> Result<Client, PkiError> {
        let builder = Client::builder().timeout(Duration::from_secs(FETCH_TIMEOUT_SECS));
        let builder = match tls {
            TlsConfig::Pinned(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    PkiError::Material(format!("cannot read {}: {e}", path.display()))
                })?;
                let cert = Certificate::from_pem(&pem)
                    .map_err(|e| PkiError::Material(format!("invalid CA certificate: {e}")))?;
                builder
                    .add_root_certificate(cert)
                    .tls_built_in_root_certs(false)
            }
            TlsConfig::Insecure => builder.danger_accept_invalid_certs(true),
        };
        builder
            .build()
            .map_err(|e| PkiError::Material(e.to_string()))
    }

    async fn fetch(&self, client: &Client, url: &str, resource: &'static str) -> Result<String, PkiError> {
        debug!(url, "fetching PKI resource");
        let response = client.get(url).send().await.map_err(|e| PkiError::Fetch {
            resource,
            reason: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PkiError::Fetch {
                resource,
                reason: format!("engine returned {status}"),
            });
        }
        response.text().await.map_err(|e| PkiError::Fetch {
            resource,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl PkiSource for HttpPkiSource {
    async fn fetch_ca_certificate(&self, custom_ca: Option<&Path>) -> Result<String, PkiError> {
        if let Some(path) = custom_ca {
            debug!(path = %path.display(), "using node-local custom CA");
            return std::fs::read_to_string(path)
                .map_err(|e| PkiError::Material(format!("cannot read {}: {e}", path.display())));
        }
        // Bootstrap fetch: we have no trust anchor yet, so the CA itself
        // is retrieved without validation and then checked against the
        // live endpoint identity.
        let client = Self::client(&TlsConfig::Insecure)?;
        let url = self.resource_url("ca-certificate", "X509-PEM-CA");
        self.fetch(&client, &url, "ca-certificate").await
    }

    async fn validate_ca(&self, ca_path: &Path) -> Result<bool, PkiError> {
        let client = Self::client(&TlsConfig::Pinned(ca_path.to_path_buf()))?;
        let url = format!("https://{}/engine/services/health", self.fqdn);
        match client.get(&url).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(error = %e, "CA validation handshake failed");
                Ok(false)
            }
        }
    }

    async fn fetch_ssh_key(&self, tls: &TlsConfig) -> Result<String, PkiError> {
        let client = Self::client(tls)?;
        let url = self.resource_url("engine-certificate", "OPENSSH-PUBKEY");
        self.fetch(&client, &url, "engine ssh key").await
    }
}
