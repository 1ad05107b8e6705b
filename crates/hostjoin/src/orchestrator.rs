//! Join pipeline orchestration.
//!
//! Sequences customization, trust establishment, credential
//! provisioning, session setup, registration, and readiness polling as
//! an explicit ordered pipeline with per-stage precondition and
//! cancellation checks. The temporary trust-anchor file is discarded
//! on every exit path, including cancellation.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, JoinConfig};
use crate::context::{CancelToken, JoinContext, Outcome, Secret};
use crate::dialog::{Dialog, DialogError, Query};
use crate::engine::{CpuProfile, EngineConnector, EngineSession, Host, HostState};
use crate::pki::PkiSource;
use crate::poller::{PollConfig, PollError, ReadinessPoller, ReadyOutcome};
use crate::registrar::{ManualSetupDispatcher, Registrar, RegistrationError};
use crate::session::{SessionError, SessionManager};
use crate::sshkeys::{CredentialProvisioner, ProvisionError};
use crate::trust::{TrustBootstrapper, TrustError};
use crate::vds::{VdsClient, VdsError};

/// Minimum supported memory for the management VM, in MB.
pub const MINIMAL_MEM_SIZE_MB: u64 = 4096;

/// Named pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Collect host name, admin password, and memory size.
    Customization,
    /// Establish the trust anchor.
    Trust,
    /// Provision the SSH access credential.
    Credentials,
    /// Open the authenticated engine session.
    Connect,
    /// Register the host with the cluster.
    Register,
    /// Poll until the host is operational.
    AwaitOperational,
    /// Wait for and assign the cluster CPU profile.
    ClusterCpu,
    /// Persist the resolved settings.
    SaveConfig,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Customization => "customization",
            Self::Trust => "trust",
            Self::Credentials => "credentials",
            Self::Connect => "connect",
            Self::Register => "register",
            Self::AwaitOperational => "await-operational",
            Self::ClusterCpu => "cluster-cpu",
            Self::SaveConfig => "save-config",
        };
        write!(f, "{name}")
    }
}

/// Errors terminating a join run.
#[derive(Error, Debug)]
pub enum JoinError {
    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error(transparent)]
    Vds(#[from] VdsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operator-supplied value failed validation.
    #[error("{0}")]
    Invalid(String),

    /// A stage ran without its required inputs.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// The run was cancelled between stages.
    #[error("join cancelled during the {0} stage")]
    Cancelled(Stage),
}

/// Drives one node's join from unknown to operational.
///
/// One orchestrator instance drives exactly one join; sessions and the
/// temporary certificate file are never shared across runs.
pub struct JoinOrchestrator<'a> {
    pki: &'a dyn PkiSource,
    connector: &'a dyn EngineConnector,
    vds: &'a dyn VdsClient,
    dialog: &'a dyn Dialog,
    dispatcher: &'a dyn ManualSetupDispatcher,
    cancel: CancelToken,
    poll_config: PollConfig,
    custom_ca: Option<PathBuf>,
    authorized_keys: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl<'a> JoinOrchestrator<'a> {
    /// Wire up an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        pki: &'a dyn PkiSource,
        connector: &'a dyn EngineConnector,
        vds: &'a dyn VdsClient,
        dialog: &'a dyn Dialog,
        dispatcher: &'a dyn ManualSetupDispatcher,
        cancel: CancelToken,
    ) -> Self {
        Self {
            pki,
            connector,
            vds,
            dialog,
            dispatcher,
            cancel,
            poll_config: PollConfig::default(),
            custom_ca: None,
            authorized_keys: None,
            config_path: None,
        }
    }

    /// Override the polling parameters.
    #[must_use]
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    /// Override the custom CA location.
    #[must_use]
    pub fn with_custom_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_ca = Some(path.into());
        self
    }

    /// Override the authorized-access store location.
    #[must_use]
    pub fn with_authorized_keys(mut self, path: impl Into<PathBuf>) -> Self {
        self.authorized_keys = Some(path.into());
        self
    }

    /// Persist resolved settings to this path after a completed join.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Run the join to a terminal [`Outcome`].
    ///
    /// Never panics and never leaks the temporary certificate file:
    /// errors are folded into [`Outcome::Failed`] with secrets
    /// redacted.
    pub async fn join(&self, mut ctx: JoinContext) -> Outcome {
        let result = self.run(&mut ctx).await;
        ctx.discard_temp_cert();
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = ctx.redact(&e.to_string());
                error!(%reason, "join failed");
                Outcome::Failed { reason }
            }
        }
    }

    async fn run(&self, ctx: &mut JoinContext) -> Result<Outcome, JoinError> {
        self.enter(Stage::Customization)?;
        self.customize(ctx).await?;

        self.enter(Stage::Trust)?;
        let mut bootstrapper = TrustBootstrapper::new(self.pki, self.dialog);
        if let Some(path) = &self.custom_ca {
            bootstrapper = bootstrapper.with_custom_ca(path);
        }
        let anchor = bootstrapper.establish_trust(ctx).await?;

        self.enter(Stage::Credentials)?;
        let mut provisioner = CredentialProvisioner::new(self.pki);
        if let Some(path) = &self.authorized_keys {
            provisioner = provisioner.with_store_path(path);
        }
        provisioner.provision_access(&anchor).await?;

        self.enter(Stage::Connect)?;
        let session = SessionManager::new(self.connector, self.dialog)
            .connect(ctx, &anchor)
            .await?;

        self.enter(Stage::Register)?;
        let registrar = Registrar::new(
            session.as_ref(),
            self.vds,
            self.dialog,
            self.dispatcher,
            self.cancel.clone(),
        );
        let host = registrar.register_host(ctx).await?;
        let cluster_name = ctx
            .cluster_name
            .clone()
            .ok_or(JoinError::Precondition("cluster unresolved after registration"))?;

        self.enter(Stage::AwaitOperational)?;
        let poller = ReadinessPoller::new(session.as_ref(), self.dialog, self.cancel.clone())
            .with_config(self.poll_config.clone());
        let ready = poller.await_operational(&cluster_name, &host.name).await?;

        let outcome = match ready {
            ReadyOutcome::Up => {
                self.enter(Stage::ClusterCpu)?;
                self.assign_cluster_cpu(session.as_ref(), &poller, &cluster_name)
                    .await?;

                self.enter(Stage::SaveConfig)?;
                self.save_config(ctx)?;

                // The engine owns the record; read the final state back.
                let host = match session.get_host(&host.name).await {
                    Ok(host) => host,
                    Err(_) => Host {
                        state: HostState::Up,
                        ..host
                    },
                };
                Outcome::Success(host)
            }
            ReadyOutcome::Ignored { missing_networks } => {
                self.save_config(ctx)?;
                let mut manual_steps = Vec::new();
                let reason = if missing_networks.is_empty() {
                    format!("host {} left in non-operational state", host.name)
                } else {
                    manual_steps.push(format!(
                        "set up the required networks on this host: {}",
                        missing_networks.join(", ")
                    ));
                    format!(
                        "host {} is missing required networks: {}",
                        host.name,
                        missing_networks.join(", ")
                    )
                };
                manual_steps.push("activate the host in the engine administration UI".into());
                manual_steps.push("restart the high-availability services on this node".into());
                Outcome::Degraded {
                    reason,
                    manual_steps,
                }
            }
            ReadyOutcome::TimedOut => {
                self.save_config(ctx)?;
                Outcome::Degraded {
                    reason: format!(
                        "timed out waiting for host {} to become operational",
                        host.name
                    ),
                    manual_steps: vec![
                        "check the engine and deployment logs".into(),
                        "activate the host in the engine administration UI once it is up".into(),
                    ],
                }
            }
            ReadyOutcome::Failed => Outcome::Failed {
                reason: format!(
                    "host {} was found in a failed state, check engine and deployment logs",
                    host.name
                ),
            },
        };

        if let Err(e) = session.disconnect().await {
            warn!(error = %e, "engine session teardown failed");
        }
        Ok(outcome)
    }

    fn enter(&self, stage: Stage) -> Result<(), JoinError> {
        if self.cancel.is_cancelled() {
            return Err(JoinError::Cancelled(stage));
        }
        info!(stage = %stage, "entering stage");
        Ok(())
    }

    /// Collect host name, admin password, and memory size, honoring
    /// pre-seeded values.
    async fn customize(&self, ctx: &mut JoinContext) -> Result<(), JoinError> {
        while ctx.host_name.is_none() {
            let suggested = ctx.suggested_host_name();
            let name = self.dialog.query_string(&Query {
                name: "host_name",
                prompt: "Enter the name which will be used to identify this host inside the engine",
                valid_values: &[],
                default: Some(suggested.as_str()),
                hidden: false,
            })?;
            if name.trim().is_empty() {
                if self.dialog.interactive() {
                    error!("please specify a host name");
                    continue;
                }
                return Err(JoinError::Invalid("empty host name not allowed".into()));
            }
            ctx.host_name = Some(name.trim().to_string());
        }

        while ctx.admin_password.is_none() {
            let password = self.dialog.query_string(&Query {
                name: "admin_password",
                prompt: "Enter the administrator password that will be used for accessing the engine",
                valid_values: &[],
                default: None,
                hidden: true,
            })?;
            if password.is_empty() {
                if self.dialog.interactive() {
                    error!("please specify a password");
                    continue;
                }
                return Err(JoinError::Invalid("empty admin password not allowed".into()));
            }
            if self.dialog.interactive() {
                let check = self.dialog.query_string(&Query {
                    name: "admin_password_confirm",
                    prompt: "Confirm the administrator password",
                    valid_values: &[],
                    default: None,
                    hidden: true,
                })?;
                if check != password {
                    error!("passwords do not match");
                    continue;
                }
            }
            ctx.set_admin_password(Secret::new(password), self.dialog.interactive());
        }

        self.customize_memory(ctx).await
    }

    /// Pick the management VM memory size against the node's available
    /// memory.
    async fn customize_memory(&self, ctx: &mut JoinContext) -> Result<(), JoinError> {
        let stats = self.vds.stats().await?;
        let max_mem = stats.mem_available_mb;
        if max_mem < MINIMAL_MEM_SIZE_MB {
            warn!(
                required = MINIMAL_MEM_SIZE_MB,
                available = max_mem,
                "minimum memory requirements not met by available memory"
            );
        }

        let default = MINIMAL_MEM_SIZE_MB.min(max_mem.max(1));
        loop {
            let value = match ctx.mem_size_mb {
                Some(value) => value,
                None => {
                    let default_str = default.to_string();
                    let answer = self.dialog.query_string(&Query {
                        name: "mem_size_mb",
                        prompt: "Please specify the memory size of the management VM in MB",
                        valid_values: &[],
                        default: Some(default_str.as_str()),
                        hidden: false,
                    })?;
                    match answer.trim().parse::<u64>() {
                        Ok(value) => value,
                        Err(_) => {
                            if self.dialog.interactive() {
                                error!(size = %answer, "invalid memory size specified");
                                continue;
                            }
                            return Err(JoinError::Invalid(format!(
                                "invalid memory size specified: {answer}"
                            )));
                        }
                    }
                }
            };

            if value < MINIMAL_MEM_SIZE_MB || value > max_mem {
                warn!(
                    size = value,
                    available = max_mem,
                    "memory size outside the supported range"
                );
                if !self
                    .dialog
                    .confirm("memory_proceed", "Continue with the specified memory size?", true)?
                {
                    ctx.mem_size_mb = None;
                    continue;
                }
            }
            ctx.mem_size_mb = Some(value);
            return Ok(());
        }
    }

    /// Wait for the cluster CPU profile and align it with the node's
    /// detected CPU model. Failures here are logged, not fatal: the
    /// host is already operational.
    async fn assign_cluster_cpu(
        &self,
        session: &dyn EngineSession,
        poller: &ReadinessPoller<'_>,
        cluster_name: &str,
    ) -> Result<(), PollError> {
        let caps = match self.vds.capabilities().await {
            Ok(caps) => caps,
            Err(e) => {
                error!(error = %e, "cannot detect the node CPU model");
                return Ok(());
            }
        };

        let Some(cluster) = poller.await_cluster_cpu(cluster_name).await? else {
            return Ok(());
        };

        let mut update = cluster;
        update.cpu = Some(CpuProfile {
            id: caps.cpu_model.clone(),
        });
        match session.update_cluster(&update).await {
            Ok(_) => {
                // The engine derives fields from the assignment; keep
                // the authoritative copy.
                if let Err(e) = session.get_cluster(cluster_name).await {
                    warn!(error = %e, "cannot re-read the cluster after CPU assignment");
                }
            }
            Err(e) => {
                error!(
                    cluster = cluster_name,
                    detail = %e.detail(),
                    "cannot automatically set the CPU level of the cluster"
                );
            }
        }
        Ok(())
    }

    fn save_config(&self, ctx: &JoinContext) -> Result<(), JoinError> {
        if let Some(path) = &self.config_path {
            info!("updating the join configuration");
            JoinConfig::from_context(ctx).save(path)?;
        }
        Ok(())
    }
}
