//! Join configuration persistence.
//!
//! A TOML answers file pre-seeds the context for unattended runs, and
//! the resolved settings are written back after a successful join so
//! later tooling (and re-runs) can find them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::context::JoinContext;

/// Default location of the saved join configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostjoin/hostjoin.conf";

/// Errors reading or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file content is not valid TOML for this schema.
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// On-disk join settings. Every field is optional on load; absent
/// values fall back to prompts or built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Engine endpoint FQDN.
    pub engine_fqdn: Option<String>,
    /// Address the engine reaches this node at.
    pub node_address: Option<String>,
    /// Host display name inside the engine.
    pub host_name: Option<String>,
    /// Target cluster name.
    pub cluster: Option<String>,
    /// Numeric host id (drives the suggested host name).
    pub host_id: Option<u32>,
    /// SSH port offered for deployment.
    pub ssh_port: Option<u16>,
    /// Management bridge interface on the node.
    pub bridge_interface: Option<String>,
    /// Management network name on the cluster.
    pub mgmt_network: Option<String>,
    /// Let the engine rewrite firewall rules.
    pub override_iptables: Option<bool>,
    /// Hyper-converged (gluster) provisioning.
    pub gluster_provisioning: Option<bool>,
    /// Insecure-TLS override (tri-state).
    pub insecure_tls: Option<bool>,
    /// Management API principal.
    pub admin_principal: Option<String>,
    /// Management VM memory size, MB.
    pub mem_size_mb: Option<u64>,
}

impl JoinConfig {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write settings to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self).unwrap_or_default();
        std::fs::write(path, content).map_err(io_err)?;
        info!(path = %path.display(), "join configuration saved");
        Ok(())
    }

    /// Seed a context with these settings.
    pub fn apply(&self, ctx: &mut JoinContext) {
        if let Some(v) = &self.host_name {
            ctx.host_name = Some(v.clone());
        }
        if let Some(v) = &self.cluster {
            ctx.cluster_name = Some(v.clone());
        }
        if let Some(v) = self.host_id {
            ctx.host_id = v;
        }
        if let Some(v) = self.ssh_port {
            ctx.ssh_port = v;
        }
        if let Some(v) = &self.bridge_interface {
            ctx.bridge_interface = v.clone();
        }
        if let Some(v) = &self.mgmt_network {
            ctx.mgmt_network = v.clone();
        }
        if let Some(v) = self.override_iptables {
            ctx.override_iptables = v;
        }
        if let Some(v) = self.gluster_provisioning {
            ctx.gluster_provisioning = v;
        }
        if self.insecure_tls.is_some() {
            ctx.insecure_tls = self.insecure_tls;
        }
        if let Some(v) = &self.admin_principal {
            ctx.admin_principal = v.clone();
        }
        if let Some(v) = self.mem_size_mb {
            ctx.mem_size_mb = Some(v);
        }
    }

    /// Snapshot the resolved settings of a finished run.
    #[must_use]
    pub fn from_context(ctx: &JoinContext) -> Self {
        Self {
            engine_fqdn: Some(ctx.engine_fqdn.clone()),
            node_address: Some(ctx.node_address.clone()),
            host_name: ctx.host_name.clone(),
            cluster: ctx.cluster_name.clone(),
            host_id: Some(ctx.host_id),
            ssh_port: Some(ctx.ssh_port),
            bridge_interface: Some(ctx.bridge_interface.clone()),
            mgmt_network: Some(ctx.mgmt_network.clone()),
            override_iptables: Some(ctx.override_iptables),
            gluster_provisioning: Some(ctx.gluster_provisioning),
            insecure_tls: ctx.insecure_tls,
            admin_principal: Some(ctx.admin_principal.clone()),
            mem_size_mb: ctx.mem_size_mb,
        }
    }
}
