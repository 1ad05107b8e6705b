//! Join run state.
//!
//! [`JoinContext`] is the single mutable state threaded through the
//! pipeline stages, replacing any shared environment dictionary with a
//! fixed, documented field set. One context is owned by exactly one
//! orchestrator run; nothing here is shared across concurrent joins.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::engine::Host;

/// Default SSH port offered to the engine for host deployment.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default name of the management bridge on the node.
pub const DEFAULT_MGMT_BRIDGE: &str = "mgmt";

/// A secret value that never appears in logs or debug output.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Credential for the management API.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Login principal (e.g. `admin@internal`).
    pub principal: String,
    /// The secret; held only in memory.
    pub secret: Secret,
}

/// Cooperative cancellation handle.
///
/// Cloned into signal handlers and checked between polling iterations
/// and pipeline stages, so an external abort can terminate even a
/// days-long non-operational stand-off.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal result of a join attempt.
#[derive(Debug, Clone, Serialize)]
pub enum Outcome {
    /// The host is registered and operational.
    Success(Host),
    /// The host exists but requires operator follow-up. Not an error to
    /// the caller, but not silent success either.
    Degraded {
        reason: String,
        manual_steps: Vec<String>,
    },
    /// The join did not complete.
    Failed { reason: String },
}

/// Mutable state threaded through all join stages.
///
/// Field ownership is deliberately narrow: only the session manager
/// mutates the admin credential after customization, and only the trust
/// bootstrapper records the temporary certificate path.
pub struct JoinContext {
    /// Engine endpoint FQDN.
    pub engine_fqdn: String,
    /// Address the engine reaches this node at.
    pub node_address: String,
    /// Display name for the host inside the engine; prompted for when
    /// absent.
    pub host_name: Option<String>,
    /// Target cluster name; resolved by the registrar when absent.
    pub cluster_name: Option<String>,
    /// Numeric host id used to derive the suggested host name.
    pub host_id: u32,
    /// SSH port offered for deployment.
    pub ssh_port: u16,
    /// Name of the management bridge interface on this node.
    pub bridge_interface: String,
    /// Name of the cluster's management network.
    pub mgmt_network: String,
    /// Let the engine rewrite firewall rules during deployment.
    pub override_iptables: bool,
    /// Hyper-converged (gluster) provisioning requested.
    pub gluster_provisioning: bool,
    /// Insecure-TLS override: `Some(true)` pre-accepts insecure mode,
    /// `Some(false)` forbids the interactive fallback, `None` leaves the
    /// decision to the operator.
    pub insecure_tls: Option<bool>,
    /// Management API principal.
    pub admin_principal: String,
    /// Management API secret; read only by the credential provisioner
    /// and the session manager.
    pub admin_password: Option<Secret>,
    /// Whether the password was collected interactively (drives the
    /// 401 re-prompt policy).
    pub admin_password_interactive: bool,
    /// Memory size for the management VM, in MB.
    pub mem_size_mb: Option<u64>,
    /// Path of the temporary trust-anchor certificate file; removed
    /// unconditionally at orchestrator teardown.
    pub temp_cert_path: Option<PathBuf>,
    /// Strings that must never appear in surfaced text.
    redactions: Vec<String>,
}

impl JoinContext {
    /// Create a context for one join run.
    #[must_use]
    pub fn new(engine_fqdn: impl Into<String>, node_address: impl Into<String>) -> Self {
        Self {
            engine_fqdn: engine_fqdn.into(),
            node_address: node_address.into(),
            host_name: None,
            cluster_name: None,
            host_id: 1,
            ssh_port: DEFAULT_SSH_PORT,
            bridge_interface: DEFAULT_MGMT_BRIDGE.to_string(),
            mgmt_network: DEFAULT_MGMT_BRIDGE.to_string(),
            override_iptables: true,
            gluster_provisioning: false,
            insecure_tls: None,
            admin_principal: "admin@internal".to_string(),
            admin_password: None,
            admin_password_interactive: false,
            mem_size_mb: None,
            temp_cert_path: None,
            redactions: Vec::new(),
        }
    }

    /// Suggested host display name for prompts.
    #[must_use]
    pub fn suggested_host_name(&self) -> String {
        format!("hosted_engine_{}", self.host_id)
    }

    /// Set the admin password and register it for redaction.
    pub fn set_admin_password(&mut self, secret: Secret, interactive: bool) {
        self.redactions.push(secret.expose().to_string());
        self.admin_password = Some(secret);
        self.admin_password_interactive = interactive;
    }

    /// The credential for the management API, if a password is set.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.admin_password.as_ref().map(|secret| Credential {
            principal: self.admin_principal.clone(),
            secret: secret.clone(),
        })
    }

    /// Strip every registered secret from a piece of text.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.redactions {
            if !secret.is_empty() {
                out = out.replace(secret, "****");
            }
        }
        out
    }

    /// Remove the temporary trust-anchor file, if one was written.
    ///
    /// Idempotent; called on every orchestrator exit path.
    pub fn discard_temp_cert(&mut self) {
        if let Some(path) = self.temp_cert_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e,
                        "could not remove temporary certificate");
                }
            }
        }
    }
}

impl Drop for JoinContext {
    // Backstop for the cleanup invariant; the orchestrator normally
    // discards the file explicitly.
    fn drop(&mut self) {
        self.discard_temp_cert();
    }
}
