//! Engine API value types.
//!
//! The engine exposes clusters, networks, and hosts as remote objects.
//! They are modeled here as plain immutable values; every mutation goes
//! through an explicit `update_*` call on the session so there are no
//! hidden remote-proxy objects.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the engine API.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connection refused, TLS, timeout).
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine answered with an error status and a detail string.
    #[error("engine returned {status}: {detail}")]
    Remote { status: u16, detail: String },

    /// The engine answered with a payload we could not decode.
    #[error("unexpected engine payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Local TLS material could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl ApiError {
    /// Whether this is a credential rejection (401-equivalent).
    ///
    /// The session manager treats this differently from every other
    /// failure: it is recoverable by re-prompting the operator.
    #[must_use]
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::Remote { status: 401, .. })
    }

    /// Human-readable detail suitable for surfacing to the operator.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::Remote { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// TLS trust configuration for engine-facing clients.
#[derive(Debug, Clone)]
pub enum TlsConfig {
    /// Validate the endpoint against a pinned CA certificate file.
    Pinned(PathBuf),
    /// Skip certificate validation. Only reachable through an explicit
    /// operator decision or a pre-set override.
    Insecure,
}

/// Host lifecycle state as reported by the engine.
///
/// Externally owned: this system only observes transitions, it never
/// sets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Deployment is running on the host.
    Installing,
    /// Registered but not eligible to run workloads.
    NonOperational,
    /// Fully operational.
    Up,
    /// Deployment failed; terminal.
    Failed,
    /// Any state we do not recognize; treated as transient.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installing => write!(f, "installing"),
            Self::NonOperational => write!(f, "non_operational"),
            Self::Up => write!(f, "up"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// CPU profile assigned to a cluster.
///
/// The engine populates this asynchronously after the first host comes
/// up; until then it is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuProfile {
    /// CPU model identifier (e.g. `model_SandyBridge`).
    pub id: String,
}

/// A cluster visible to the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique cluster identifier.
    pub id: String,
    /// Cluster display name.
    pub name: String,
    /// CPU profile, absent until the engine derives it.
    pub cpu: Option<CpuProfile>,
    /// Whether the gluster (hyper-converged) service is enabled.
    #[serde(default)]
    pub gluster_service: bool,
}

/// A logical network defined at cluster scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Unique network identifier.
    pub id: String,
    /// Network display name.
    pub name: String,
    /// Whether hosts must carry this network to be operational.
    #[serde(default)]
    pub required: bool,
    /// VLAN tag, if the network is vlanned.
    pub vlan: Option<u16>,
}

/// A host NIC as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nic {
    /// Interface name.
    pub name: String,
    /// Identifier of the network attached to this NIC, if any.
    pub network_id: Option<String>,
}

/// A registered host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host display name (identity inside the engine).
    pub name: String,
    /// Address the engine reaches the host at.
    pub address: String,
    /// Current lifecycle state.
    pub state: HostState,
    /// Identifier of the cluster the host belongs to.
    pub cluster_id: String,
}

/// SSH authentication method for host deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshAuthMethod {
    /// Engine authenticates with its signed public key.
    PublicKey,
    /// Engine authenticates with the root password.
    Password,
}

/// Host registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    /// Display name for the host.
    pub name: String,
    /// Address the engine should deploy to.
    pub address: String,
    /// Target cluster identifier.
    pub cluster_id: String,
    /// SSH authentication method used for deployment.
    pub ssh_auth_method: SshAuthMethod,
    /// SSH port on the host.
    pub ssh_port: u16,
    /// Let the engine rewrite the host firewall rules.
    pub override_iptables: bool,
    /// Reboot the host once deployment finishes. Disabled for the join
    /// flow: the node is already running the management VM stack.
    pub reboot_after_installation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_state_decoding() {
        let state: HostState = serde_json::from_str("\"non_operational\"").unwrap();
        assert_eq!(state, HostState::NonOperational);

        // States added by future engine versions must not break polling.
        let state: HostState = serde_json::from_str("\"preparing_for_maintenance\"").unwrap();
        assert_eq!(state, HostState::Unknown);
    }

    #[test]
    fn test_auth_rejection_is_distinguished() {
        let rejected = ApiError::Remote {
            status: 401,
            detail: "credentials rejected".into(),
        };
        let other = ApiError::Remote {
            status: 409,
            detail: "conflict".into(),
        };
        assert!(rejected.is_auth_rejected());
        assert!(!other.is_auth_rejected());
    }

    #[test]
    fn test_host_spec_encoding() {
        let spec = HostSpec {
            name: "node-1".into(),
            address: "node-1.example.org".into(),
            cluster_id: "c1".into(),
            ssh_auth_method: SshAuthMethod::PublicKey,
            ssh_port: 22,
            override_iptables: true,
            reboot_after_installation: false,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["ssh_auth_method"], "publickey");
        assert_eq!(value["reboot_after_installation"], false);
    }
}
