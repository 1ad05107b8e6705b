//! Authenticated session management against the engine API.
//!
//! Opens a session and probes it with one lightweight call before
//! handing it to the registrar. Credential rejections are recovered by
//! re-prompting the operator; everything else is surfaced immediately.

use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::context::{JoinContext, Secret};
use crate::dialog::{Dialog, DialogError, Query};
use crate::engine::{EngineConnector, EngineSession};
use crate::trust::TrustAnchor;

/// Default engine API timeout.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(60);

/// Credential rejection by the engine.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The engine did not accept the administrator password.
    #[error("the engine API did not accept the administrator password")]
    Rejected,
}

/// Errors opening a session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Credential rejection (non-interactive runs fail fast here).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport or protocol failure, with the remote detail string.
    #[error("cannot connect to the engine API on {fqdn}: {detail}")]
    Connect { fqdn: String, detail: String },

    /// The operator aborted a prompt.
    #[error(transparent)]
    Dialog(#[from] DialogError),
}

/// Opens and re-authenticates engine sessions.
pub struct SessionManager<'a> {
    connector: &'a dyn EngineConnector,
    dialog: &'a dyn Dialog,
    timeout: Duration,
}

impl<'a> SessionManager<'a> {
    /// Create a session manager with the default API timeout.
    #[must_use]
    pub fn new(connector: &'a dyn EngineConnector, dialog: &'a dyn Dialog) -> Self {
        Self {
            connector,
            dialog,
            timeout: DEFAULT_API_TIMEOUT,
        }
    }

    /// Override the API timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Open a session and confirm connectivity and credential validity.
    ///
    /// On a credential rejection: interactively collected passwords are
    /// re-prompted (operator-paced, unbounded); pre-seeded passwords
    /// fail immediately with zero retries. Transport errors are never
    /// retried automatically.
    ///
    /// # Errors
    /// Returns [`AuthError::Rejected`] via [`SessionError::Auth`] for
    /// non-interactive credential rejections, [`SessionError::Connect`]
    /// for anything else the engine refused.
    pub async fn connect(
        &self,
        ctx: &mut JoinContext,
        anchor: &TrustAnchor,
    ) -> Result<Box<dyn EngineSession>, SessionError> {
        loop {
            let Some(credential) = ctx.credential() else {
                // Password was never collected; treat like a rejection
                // so the interactive path can recover.
                self.reprompt_or_fail(ctx, false)?;
                continue;
            };

            info!(fqdn = %ctx.engine_fqdn, "connecting to the engine");
            let session = self
                .connector
                .authenticate(
                    &credential.principal,
                    credential.secret.expose(),
                    &anchor.tls_config(),
                    self.timeout,
                )
                .await;

            // One lightweight authenticated call confirms both
            // connectivity and credential validity.
            let probe = match session {
                Ok(session) => match session.list_clusters().await {
                    Ok(_) => return Ok(session),
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if probe.is_auth_rejected() {
                self.reprompt_or_fail(ctx, true)?;
                continue;
            }

            return Err(SessionError::Connect {
                fqdn: ctx.engine_fqdn.clone(),
                detail: ctx.redact(&probe.detail()),
            });
        }
    }

    /// Collect a corrected password, or fail fast when no operator is
    /// pacing the retries.
    fn reprompt_or_fail(&self, ctx: &mut JoinContext, rejected: bool) -> Result<(), SessionError> {
        let interactive = self.dialog.interactive()
            && (ctx.admin_password_interactive || ctx.admin_password.is_none());
        if !interactive {
            return Err(AuthError::Rejected.into());
        }
        if rejected {
            error!("the engine API did not accept the administrator password, please retry");
        }
        let password = self.dialog.query_string(&Query {
            name: "admin_password",
            prompt: "Enter the administrator password for the engine API",
            valid_values: &[],
            default: None,
            hidden: true,
        })?;
        ctx.set_admin_password(Secret::new(password), true);
        Ok(())
    }
}
