//! Trust establishment against the engine endpoint.
//!
//! Obtains the cluster CA and validates it against the endpoint's live
//! service identity, falling back to an operator-confirmed insecure
//! mode. The fetch/validate loop is unbounded: each iteration ends in
//! an operator decision, not an automatic retry.

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::context::JoinContext;
use crate::dialog::{Dialog, DialogError};
use crate::engine::TlsConfig;
use crate::pki::{PkiError, PkiSource};

/// Node-local custom CA location. When this file exists it takes
/// precedence over the engine's own issued CA.
pub const CUSTOM_CA_PATH: &str = "/etc/hostjoin/ca.pem";

/// Where the CA material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaSource {
    /// Node-local custom CA file.
    Custom,
    /// The endpoint's own issued CA.
    Internal,
}

impl std::fmt::Display for CaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom => write!(f, "custom"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// CA material used to validate the engine endpoint.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    /// Where the certificate came from.
    pub source: CaSource,
    /// Path of the temporary certificate file; absent in insecure mode.
    pub cert_path: Option<PathBuf>,
    /// Whether the endpoint identity validated against the CA.
    pub validated: bool,
}

impl TrustAnchor {
    /// TLS configuration for engine-facing clients built on this anchor.
    #[must_use]
    pub fn tls_config(&self) -> TlsConfig {
        match (&self.cert_path, self.validated) {
            (Some(path), true) => TlsConfig::Pinned(path.clone()),
            _ => TlsConfig::Insecure,
        }
    }
}

/// Errors from trust establishment.
#[derive(Error, Debug)]
pub enum TrustError {
    /// Validation failed and no insecure fallback was available.
    #[error("failed trusting the engine API certificate")]
    Untrusted,

    /// The operator declined the insecure fallback.
    #[error("operator rejected the insecure TLS fallback")]
    Rejected,

    /// CA material could not be acquired.
    #[error(transparent)]
    Fetch(#[from] PkiError),

    /// Temporary certificate file could not be written.
    #[error("cannot write certificate file: {0}")]
    Io(#[from] std::io::Error),

    /// The operator aborted a prompt.
    #[error(transparent)]
    Dialog(#[from] DialogError),
}

/// Establishes the trust anchor for all later engine traffic.
pub struct TrustBootstrapper<'a> {
    pki: &'a dyn PkiSource,
    dialog: &'a dyn Dialog,
    custom_ca: PathBuf,
}

impl<'a> TrustBootstrapper<'a> {
    /// Create a bootstrapper using the default custom CA location.
    #[must_use]
    pub fn new(pki: &'a dyn PkiSource, dialog: &'a dyn Dialog) -> Self {
        Self {
            pki,
            dialog,
            custom_ca: PathBuf::from(CUSTOM_CA_PATH),
        }
    }

    /// Override the custom CA location.
    #[must_use]
    pub fn with_custom_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_ca = path.into();
        self
    }

    /// Obtain and validate the cluster CA, or fall back to insecure
    /// mode.
    ///
    /// Writes exactly one temporary certificate file; its path is
    /// recorded in the context for guaranteed later removal.
    ///
    /// # Errors
    /// Returns [`TrustError::Rejected`] when the operator declines the
    /// insecure fallback, [`TrustError::Untrusted`] when running
    /// non-interactively without an override.
    pub async fn establish_trust(&self, ctx: &mut JoinContext) -> Result<TrustAnchor, TrustError> {
        if ctx.insecure_tls == Some(true) {
            warn!("TLS validation disabled by configuration");
            return Ok(TrustAnchor {
                source: CaSource::Internal,
                cert_path: None,
                validated: false,
            });
        }

        loop {
            let custom = self.custom_ca.is_file();
            let source = if custom {
                CaSource::Custom
            } else {
                CaSource::Internal
            };
            let interactive = self.dialog.interactive() && ctx.insecure_tls != Some(false);

            match self
                .pki
                .fetch_ca_certificate(custom.then_some(self.custom_ca.as_path()))
                .await
            {
                Ok(pem) => {
                    let path = Self::write_temp_cert(ctx, &pem)?;
                    if self.pki.validate_ca(&path).await? {
                        info!(source = %source, "engine API certificate trusted");
                        return Ok(TrustAnchor {
                            source,
                            cert_path: Some(path),
                            validated: true,
                        });
                    }
                    debug!(source = %source, "endpoint identity did not validate against the CA");
                }
                Err(e) => {
                    error!(error = %e, "error acquiring CA certificate");
                    if interactive {
                        // A fresh iteration is an operator decision, so
                        // there is no automatic retry bound here.
                        if self.dialog.confirm(
                            "ca_fetch_retry",
                            "Retry acquiring the CA certificate?",
                            true,
                        )? {
                            continue;
                        }
                        ctx.discard_temp_cert();
                        return Err(TrustError::Rejected);
                    }
                    return Err(TrustError::Fetch(e));
                }
            }

            if !interactive {
                ctx.discard_temp_cert();
                return Err(TrustError::Untrusted);
            }

            let accept = self.dialog.confirm(
                "tls_insecure",
                &format!(
                    "The engine API certificate could not be trusted with the {source} CA \
                     certificate.\nWould you like to continue in insecure mode (not \
                     recommended)?\nIf not, provide your CA certificate at {} before \
                     continuing",
                    self.custom_ca.display()
                ),
                false,
            )?;
            ctx.discard_temp_cert();
            if accept {
                ctx.insecure_tls = Some(true);
                warn!("continuing with TLS validation disabled");
                return Ok(TrustAnchor {
                    source,
                    cert_path: None,
                    validated: false,
                });
            }
            return Err(TrustError::Rejected);
        }
    }

    /// Write the fetched CA into the run's single temporary file,
    /// creating it on first use.
    fn write_temp_cert(ctx: &mut JoinContext, pem: &str) -> Result<PathBuf, TrustError> {
        let path = match &ctx.temp_cert_path {
            Some(path) => path.clone(),
            None => {
                let file = tempfile::Builder::new()
                    .prefix("engine-ca")
                    .suffix(".crt")
                    .tempfile()?;
                let (_, path) = file.keep().map_err(|e| TrustError::Io(e.error))?;
                ctx.temp_cert_path = Some(path.clone());
                path
            }
        };
        let mut file = std::fs::File::create(&path)?;
        file.write_all(pem.as_bytes())?;
        Ok(path)
    }
}
