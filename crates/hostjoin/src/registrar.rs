//! Cluster membership registration.
//!
//! Resolves the target cluster, reconciles cluster-level network
//! requirements with the node's live layout, and submits the host-add
//! request. A rejected host-add drops into a manual-intervention loop
//! that only the operator (or cancellation) terminates.

use thiserror::Error;
use tracing::{debug, error, info};

use crate::context::{CancelToken, JoinContext};
use crate::dialog::{Dialog, DialogError, Query};
use crate::engine::{ApiError, Cluster, EngineSession, Host, HostSpec, SshAuthMethod};
use crate::vds::{VdsClient, VdsError};

/// Cluster name preferred when the operator did not pick one.
const DEFAULT_CLUSTER_NAME: &str = "Default";

/// Callback invoked when a host-add is rejected. Presents the operator
/// a bounded menu of fallback actions and reports whether the
/// situation was resolved (the host became reachable through an
/// alternate path).
pub trait ManualSetupDispatcher: Send + Sync {
    /// Run the fallback menu once.
    ///
    /// # Errors
    /// Returns an error if the operator aborts the menu.
    fn dispatch(&self, engine_fqdn: &str, detail: &str) -> Result<bool, DialogError>;
}

/// Errors from host registration.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// The pre-specified cluster does not exist on the engine.
    #[error("specified cluster does not exist: {0}")]
    UnknownCluster(String),

    /// The engine rejected the registration and the situation was not
    /// recovered.
    #[error("cannot add the host to the cluster: {detail}")]
    Remote { detail: String },

    /// Engine API failure outside the host-add call itself.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The node's hypervisor control service failed.
    #[error(transparent)]
    Vds(#[from] VdsError),

    /// The operator aborted a prompt.
    #[error(transparent)]
    Dialog(#[from] DialogError),

    /// The run was cancelled during the manual-intervention loop.
    #[error("registration cancelled")]
    Cancelled,

    /// The pipeline reached registration without a host display name.
    #[error("host display name was not collected before registration")]
    MissingHostName,
}

/// Registers this node with the engine.
pub struct Registrar<'a> {
    session: &'a dyn EngineSession,
    vds: &'a dyn VdsClient,
    dialog: &'a dyn Dialog,
    dispatcher: &'a dyn ManualSetupDispatcher,
    cancel: CancelToken,
}

impl<'a> Registrar<'a> {
    /// Create a registrar bound to a live session.
    #[must_use]
    pub fn new(
        session: &'a dyn EngineSession,
        vds: &'a dyn VdsClient,
        dialog: &'a dyn Dialog,
        dispatcher: &'a dyn ManualSetupDispatcher,
        cancel: CancelToken,
    ) -> Self {
        Self {
            session,
            vds,
            dialog,
            dispatcher,
            cancel,
        }
    }

    /// Resolve the cluster, apply cluster-level adjustments, and submit
    /// the host-add request.
    ///
    /// # Errors
    /// Returns [`RegistrationError::UnknownCluster`] when a
    /// pre-specified cluster is missing, [`RegistrationError::Remote`]
    /// when the engine rejects the host and no recovery happened.
    pub async fn register_host(&self, ctx: &mut JoinContext) -> Result<Host, RegistrationError> {
        let host_name = ctx
            .host_name
            .clone()
            .ok_or(RegistrationError::MissingHostName)?;

        let mut cluster = self.resolve_cluster(ctx).await?;
        self.reconcile_networks(ctx, &cluster).await?;

        if ctx.gluster_provisioning {
            // The engine derives further fields from the service flag,
            // so re-read the cluster after the toggle.
            info!(cluster = %cluster.name, "enabling the gluster service on the cluster");
            let mut update = cluster.clone();
            update.gluster_service = true;
            self.session.update_cluster(&update).await?;
            cluster = self.session.get_cluster(&cluster.name).await?;
        }

        let spec = HostSpec {
            name: host_name,
            address: ctx.node_address.clone(),
            cluster_id: cluster.id.clone(),
            ssh_auth_method: SshAuthMethod::PublicKey,
            ssh_port: ctx.ssh_port,
            override_iptables: ctx.override_iptables,
            reboot_after_installation: false,
        };

        loop {
            if self.cancel.is_cancelled() {
                return Err(RegistrationError::Cancelled);
            }
            debug!(cluster = %cluster.name, "adding the host to the cluster");
            match self.session.add_host(&spec).await {
                Ok(host) => {
                    info!(host = %host.name, cluster = %cluster.name, "host registration submitted");
                    return Ok(host);
                }
                Err(e) => {
                    let detail = ctx.redact(&e.detail());
                    error!(
                        cluster = %cluster.name,
                        %detail,
                        "cannot automatically add the host to the cluster"
                    );
                    if !self.dialog.interactive() {
                        return Err(RegistrationError::Remote { detail });
                    }
                    // Operator-terminated by design: loop the fallback
                    // menu until the dispatcher reports the situation
                    // resolved, then retry the registration.
                    while !self.dispatcher.dispatch(&ctx.engine_fqdn, &detail)? {
                        if self.cancel.is_cancelled() {
                            return Err(RegistrationError::Cancelled);
                        }
                    }
                }
            }
        }
    }

    /// Pick the target cluster and record the choice in the context.
    async fn resolve_cluster(&self, ctx: &mut JoinContext) -> Result<Cluster, RegistrationError> {
        let clusters = self.session.list_clusters().await?;
        let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();

        let chosen = match ctx.cluster_name.clone() {
            Some(name) => {
                if !names.contains(&name.as_str()) {
                    return Err(RegistrationError::UnknownCluster(name));
                }
                name
            }
            None => {
                let Some(first) = names.first() else {
                    return Err(RegistrationError::Remote {
                        detail: "no clusters are visible to this session".into(),
                    });
                };
                let default = if names.contains(&DEFAULT_CLUSTER_NAME) {
                    DEFAULT_CLUSTER_NAME
                } else {
                    first
                };
                let chosen = self.dialog.query_string(&Query {
                    name: "cluster_name",
                    prompt: "Enter the name of the cluster to which you want to add the host",
                    valid_values: &names,
                    default: Some(default),
                    hidden: false,
                })?;
                ctx.cluster_name = Some(chosen.clone());
                chosen
            }
        };

        Ok(self.session.get_cluster(&chosen).await?)
    }

    /// Align the cluster's management network with the node's bridge
    /// VLAN before host-add; the engine associates network topology at
    /// cluster scope.
    async fn reconcile_networks(
        &self,
        ctx: &JoinContext,
        cluster: &Cluster,
    ) -> Result<(), RegistrationError> {
        let caps = self.vds.capabilities().await?;
        let Some(&vlan_id) = caps.vlans.get(&ctx.bridge_interface) else {
            debug!(bridge = %ctx.bridge_interface, "management bridge carries no VLAN tag");
            return Ok(());
        };

        let networks = self.session.list_cluster_networks(&cluster.id).await?;
        let Some(mgmt) = networks.into_iter().find(|n| n.name == ctx.mgmt_network) else {
            debug!(network = %ctx.mgmt_network, "management network not defined on the cluster");
            return Ok(());
        };

        if mgmt.vlan == Some(vlan_id) {
            return Ok(());
        }

        info!(
            network = %mgmt.name,
            vlan = vlan_id,
            "updating the cluster management network to match the vlanned bridge"
        );
        let mut update = mgmt;
        update.vlan = Some(vlan_id);
        self.session
            .update_cluster_network(&cluster.id, &update)
            .await?;
        Ok(())
    }
}
