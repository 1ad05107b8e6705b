//! Management engine API abstraction.
//!
//! The orchestrator talks to the engine through the [`EngineSession`]
//! trait so the join pipeline can be exercised against scripted
//! implementations in tests. The production implementation lives in
//! [`http`] and speaks JSON over HTTPS.

pub mod http;
mod types;

use std::time::Duration;

use async_trait::async_trait;

pub use http::HttpEngineConnector;
pub use types::{
    ApiError, Cluster, CpuProfile, Host, HostSpec, HostState, Network, Nic, SshAuthMethod,
    TlsConfig,
};

/// An authenticated session against the engine API.
///
/// All objects are returned by value; mutations go through the explicit
/// `update_*` calls and callers are expected to re-read afterwards, the
/// engine being authoritative about derived fields.
#[async_trait]
pub trait EngineSession: Send + Sync + std::fmt::Debug {
    /// List the clusters visible to this session.
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ApiError>;

    /// Fetch a cluster by name.
    async fn get_cluster(&self, name: &str) -> Result<Cluster, ApiError>;

    /// Push cluster-level changes and return the stored object.
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster, ApiError>;

    /// List the networks attached to a cluster.
    async fn list_cluster_networks(&self, cluster_id: &str) -> Result<Vec<Network>, ApiError>;

    /// Push changes to a cluster-scoped network definition.
    async fn update_cluster_network(
        &self,
        cluster_id: &str,
        network: &Network,
    ) -> Result<Network, ApiError>;

    /// Submit a host registration request.
    async fn add_host(&self, spec: &HostSpec) -> Result<Host, ApiError>;

    /// Fetch a host by name.
    async fn get_host(&self, name: &str) -> Result<Host, ApiError>;

    /// List the NICs of a host, with attached networks.
    async fn list_host_nics(&self, host_name: &str) -> Result<Vec<Nic>, ApiError>;

    /// Tear the session down on the engine side.
    async fn disconnect(&self) -> Result<(), ApiError>;
}

/// Opens authenticated sessions against an engine endpoint.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Authenticate against the engine and return a live session.
    ///
    /// Credential validity is not guaranteed at return time; callers
    /// should probe with a lightweight call (the session manager uses
    /// [`EngineSession::list_clusters`]).
    async fn authenticate(
        &self,
        principal: &str,
        secret: &str,
        tls: &TlsConfig,
        timeout: Duration,
    ) -> Result<Box<dyn EngineSession>, ApiError>;
}
