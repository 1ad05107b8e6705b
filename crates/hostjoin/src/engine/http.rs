//! HTTP implementation of the engine API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Response};
use tracing::debug;
use url::Url;

use super::types::{ApiError, Cluster, Host, HostSpec, Network, Nic, TlsConfig};
use super::{EngineConnector, EngineSession};

/// Connector for the engine's JSON API.
#[derive(Debug, Clone)]
pub struct HttpEngineConnector {
    /// API base URL (e.g. `https://mgmt.example.org/engine/api`).
    base_url: Url,
}

impl HttpEngineConnector {
    /// Create a connector for the given API base URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    /// Build an HTTP client honoring the trust configuration.
    fn build_client(tls: &TlsConfig, timeout: Duration) -> Result<Client, ApiError> {
        let builder = Client::builder().timeout(timeout);
        let builder = match tls {
            TlsConfig::Pinned(path) => {
                let pem = std::fs::read(path)
                    .map_err(|e| ApiError::Tls(format!("cannot read {}: {e}", path.display())))?;
                let cert = Certificate::from_pem(&pem)
                    .map_err(|e| ApiError::Tls(format!("invalid CA certificate: {e}")))?;
                builder
                    .add_root_certificate(cert)
                    .tls_built_in_root_certs(false)
            }
            TlsConfig::Insecure => builder.danger_accept_invalid_certs(true),
        };
        builder.build().map_err(ApiError::from)
    }
}

#[async_trait]
impl EngineConnector for HttpEngineConnector {
    async fn authenticate(
        &self,
        principal: &str,
        secret: &str,
        tls: &TlsConfig,
        timeout: Duration,
    ) -> Result<Box<dyn EngineSession>, ApiError> {
        let client = Self::build_client(tls, timeout)?;
        Ok(Box::new(HttpEngineSession {
            client,
            base_url: self.base_url.clone(),
            principal: principal.to_string(),
            secret: secret.to_string(),
        }))
    }
}

/// An authenticated HTTP session. Credentials ride on every request;
/// the engine decides their validity per call.
#[derive(Debug)]
pub struct HttpEngineSession {
    client: Client,
    base_url: Url,
    principal: String,
    secret: String,
}

impl HttpEngineSession {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn handle<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(ApiError::Remote {
                status: status.as_u16(),
                detail,
            })
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.principal, Some(&self.secret))
            .send()
            .await?;
        Self::handle(response).await
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = self.url(path);
        debug!(url = %url, "POST request");
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.principal, Some(&self.secret))
            .json(body)
            .send()
            .await?;
        Self::handle(response).await
    }

    async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let url = self.url(path);
        debug!(url = %url, "PUT request");
        let response = self
            .client
            .put(&url)
            .basic_auth(&self.principal, Some(&self.secret))
            .json(body)
            .send()
            .await?;
        Self::handle(response).await
    }
}

#[async_trait]
impl EngineSession for HttpEngineSession {
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError> {
        self.get("/clusters").await
    }

    async fn get_cluster(&self, name: &str) -> Result<Cluster, ApiError> {
        self.get(&format!("/clusters/{name}")).await
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ApiError> {
        self.put(&format!("/clusters/{}", cluster.id), cluster).await
    }

    async fn list_cluster_networks(&self, cluster_id: &str) -> Result<Vec<Network>, ApiError> {
        self.get(&format!("/clusters/{cluster_id}/networks")).await
    }

    async fn update_cluster_network(
        &self,
        cluster_id: &str,
        network: &Network,
    ) -> Result<Network, ApiError> {
        self.put(
            &format!("/clusters/{cluster_id}/networks/{}", network.id),
            network,
        )
        .await
    }

    async fn add_host(&self, spec: &HostSpec) -> Result<Host, ApiError> {
        self.post("/hosts", spec).await
    }

    async fn get_host(&self, name: &str) -> Result<Host, ApiError> {
        self.get(&format!("/hosts/{name}")).await
    }

    async fn list_host_nics(&self, host_name: &str) -> Result<Vec<Nic>, ApiError> {
        self.get(&format!("/hosts/{host_name}/nics")).await
    }

    async fn disconnect(&self) -> Result<(), ApiError> {
        let url = self.url("/session");
        debug!(url = %url, "DELETE request");
        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.principal, Some(&self.secret))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(ApiError::Remote {
                status: status.as_u16(),
                detail,
            })
        }
    }
}
