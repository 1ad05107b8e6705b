//! Post-registration readiness polling.
//!
//! Watches the host state reported by the engine until it is
//! operational or terminally failed, escalating non-operational states
//! to the operator. A companion poller waits for the cluster CPU
//! profile, which the engine populates asynchronously.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::CancelToken;
use crate::dialog::{Dialog, DialogError, Query};
use crate::engine::{Cluster, EngineSession, HostState};

/// Polling parameters.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Maximum state observations before reporting a timeout.
    pub max_attempts: u32,
    /// Cooperative sleep between observations.
    pub interval: Duration,
    /// Emit a progress notice every this many attempts.
    pub notice_every: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 600,
            interval: Duration::from_secs(1),
            notice_every: 30,
        }
    }
}

/// Terminal result of readiness polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The host reached the operational state.
    Up,
    /// The engine reported the host as failed.
    Failed,
    /// `max_attempts` elapsed without a terminal state. Reported
    /// distinctly from `Failed`: the host may still come up later.
    TimedOut,
    /// The operator chose to stop waiting on a non-operational host.
    Ignored {
        /// Names of required networks still missing on the host, empty
        /// when the state had no network explanation.
        missing_networks: Vec<String>,
    },
}

/// Errors from polling (the loop itself swallows transient API
/// failures).
#[derive(Error, Debug)]
pub enum PollError {
    /// The operator aborted a prompt.
    #[error(transparent)]
    Dialog(#[from] DialogError),

    /// The run was cancelled between observations.
    #[error("polling cancelled")]
    Cancelled,
}

/// Operator decision for a non-operational host.
enum NonOpDecision {
    Retry,
    Ignore { missing_networks: Vec<String> },
}

/// Polls host and cluster state after registration.
pub struct ReadinessPoller<'a> {
    session: &'a dyn EngineSession,
    dialog: &'a dyn Dialog,
    cancel: CancelToken,
    config: PollConfig,
}

impl<'a> ReadinessPoller<'a> {
    /// Create a poller with the default configuration.
    #[must_use]
    pub fn new(session: &'a dyn EngineSession, dialog: &'a dyn Dialog, cancel: CancelToken) -> Self {
        Self {
            session,
            dialog,
            cancel,
            config: PollConfig::default(),
        }
    }

    /// Override the polling parameters.
    #[must_use]
    pub fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// Wait for the host to become operational.
    ///
    /// # Errors
    /// Returns an error only on prompt abort or cancellation; engine
    /// read errors are treated as transient observations.
    pub async fn await_operational(
        &self,
        cluster_name: &str,
        host_name: &str,
    ) -> Result<ReadyOutcome, PollError> {
        info!(
            host = host_name,
            "waiting for the host to become operational in the engine, this may take several minutes"
        );

        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            if attempts >= self.config.max_attempts {
                error!(
                    host = host_name,
                    "timed out while waiting for the host to start, check the engine logs"
                );
                return Ok(ReadyOutcome::TimedOut);
            }
            attempts += 1;

            let state = match self.session.get_host(host_name).await {
                Ok(host) => host.state,
                Err(e) => {
                    debug!(error = %e, "error fetching host state");
                    HostState::Unknown
                }
            };
            debug!(host = host_name, state = %state, "host state observed");

            match state {
                HostState::Failed => {
                    error!(
                        host = host_name,
                        "the host was found in a failed state, check engine and deployment logs"
                    );
                    return Ok(ReadyOutcome::Failed);
                }
                HostState::Up => {
                    info!(host = host_name, "the host is now operational");
                    return Ok(ReadyOutcome::Up);
                }
                HostState::NonOperational => {
                    match self.resolve_non_operational(cluster_name, host_name).await? {
                        NonOpDecision::Retry => {}
                        NonOpDecision::Ignore { missing_networks } => {
                            warn!(host = host_name, "not waiting for the host to become operational");
                            return Ok(ReadyOutcome::Ignored { missing_networks });
                        }
                    }
                }
                HostState::Installing | HostState::Unknown => {}
            }

            if attempts % self.config.notice_every == 0 {
                info!(host = host_name, "still waiting for the host to become operational");
            }
            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Explain a non-operational host and ask the operator whether to
    /// keep waiting.
    ///
    /// Required networks missing from the host are the usual cause and
    /// are listed explicitly; anything else gets a generic notice. Any
    /// engine read error here degrades to Retry.
    async fn resolve_non_operational(
        &self,
        cluster_name: &str,
        host_name: &str,
    ) -> Result<NonOpDecision, PollError> {
        let missing = match self.missing_required_networks(cluster_name, host_name).await {
            Ok(missing) => missing,
            Err(e) => {
                debug!(error = %e, "error fetching the network configuration");
                return Ok(NonOpDecision::Retry);
            }
        };

        if missing.is_empty() {
            self.dialog.note(&format!(
                "The host {host_name} is in non-operational state.\n\
                 Please try to activate it via the engine administration UI."
            ));
        } else {
            self.dialog.note(&format!(
                "The following required networks\n  {}\nstill need to be configured on \
                 {host_name} in order to make it operational. Please set them up via the \
                 engine administration UI or flag them as not required.\nWhen finished, \
                 activate the host.",
                missing.join(", ")
            ));
        }

        let answer = self.dialog.query_string(&Query {
            name: if missing.is_empty() {
                "non_operational"
            } else {
                "required_networks"
            },
            prompt: "Retry checking host status or ignore this and continue",
            valid_values: &["Retry", "Ignore"],
            default: Some("Retry"),
            hidden: false,
        })?;

        if answer.eq_ignore_ascii_case("ignore") {
            Ok(NonOpDecision::Ignore {
                missing_networks: missing,
            })
        } else {
            Ok(NonOpDecision::Retry)
        }
    }

    /// Required cluster networks with no configured counterpart on the
    /// host, by name.
    async fn missing_required_networks(
        &self,
        cluster_name: &str,
        host_name: &str,
    ) -> Result<Vec<String>, crate::engine::ApiError> {
        let cluster = self.session.get_cluster(cluster_name).await?;
        let networks = self.session.list_cluster_networks(&cluster.id).await?;
        let nics = self.session.list_host_nics(host_name).await?;

        let configured: BTreeSet<String> = nics.into_iter().filter_map(|n| n.network_id).collect();
        Ok(networks
            .into_iter()
            .filter(|n| n.required && !configured.contains(&n.id))
            .map(|n| n.name)
            .collect())
    }

    /// Wait for the engine to populate the cluster's CPU profile.
    ///
    /// Returns the cluster once the profile is present, or `None` on
    /// timeout. Same bounded-retry shape as host polling.
    ///
    /// # Errors
    /// Returns an error only on cancellation.
    pub async fn await_cluster_cpu(&self, cluster_name: &str) -> Result<Option<Cluster>, PollError> {
        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            if attempts >= self.config.max_attempts {
                error!(
                    cluster = cluster_name,
                    "timed out while waiting for the cluster to become ready, check the engine logs"
                );
                return Ok(None);
            }
            attempts += 1;

            match self.session.get_cluster(cluster_name).await {
                Ok(cluster) if cluster.cpu.is_some() => return Ok(Some(cluster)),
                Ok(_) => {
                    debug!(cluster = cluster_name, "cluster CPU profile not populated yet");
                }
                Err(e) => {
                    debug!(error = %e, "error fetching cluster state");
                }
            }

            if attempts % self.config.notice_every == 0 {
                info!(cluster = cluster_name, "waiting for the cluster to become operational");
            }
            tokio::time::sleep(self.config.interval).await;
        }
    }
}
