//! SSH credential provisioning.
//!
//! Fetches the engine-signed SSH public key over the established trust
//! anchor and merges it into the node's authorized-access store. The
//! merge is idempotent and the store ends up owner-only, both hard
//! postconditions; SELinux relabeling is best-effort.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pki::{PkiError, PkiSource};
use crate::trust::TrustAnchor;

/// Errors from credential provisioning.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The signed key could not be fetched.
    #[error(transparent)]
    Fetch(#[from] PkiError),

    /// The authorized-access store could not be updated.
    #[error("cannot update {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The fetched key material was not a usable public key line.
    #[error("engine returned an unusable SSH key: {0}")]
    BadKey(String),
}

/// Default authorized-access store for the root account.
pub const DEFAULT_AUTHORIZED_KEYS: &str = "/root/.ssh/authorized_keys";

/// Provisions the engine's SSH access credential onto this node.
pub struct CredentialProvisioner<'a> {
    pki: &'a dyn PkiSource,
    store_path: PathBuf,
}

impl<'a> CredentialProvisioner<'a> {
    /// Create a provisioner writing to the default store.
    #[must_use]
    pub fn new(pki: &'a dyn PkiSource) -> Self {
        Self {
            pki,
            store_path: PathBuf::from(DEFAULT_AUTHORIZED_KEYS),
        }
    }

    /// Override the store path.
    #[must_use]
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Fetch the signed key and merge it into the store.
    ///
    /// Safe to re-run: a key already present is not duplicated, and
    /// unrelated entries are preserved.
    ///
    /// # Errors
    /// Returns an error if the key cannot be fetched or the store
    /// cannot be rewritten with owner-only permissions.
    pub async fn provision_access(&self, anchor: &TrustAnchor) -> Result<(), ProvisionError> {
        let key_line = self.pki.fetch_ssh_key(&anchor.tls_config()).await?;
        let key_line = key_line.trim();
        if key_line.is_empty() || key_line.lines().count() != 1 {
            return Err(ProvisionError::BadKey(
                "expected a single authorized_keys line".into(),
            ));
        }

        let io_err = |source| ProvisionError::Io {
            path: self.store_path.clone(),
            source,
        };

        if let Some(dir) = self.store_path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
            set_mode(dir, 0o700).map_err(io_err)?;
        }

        let existing = match std::fs::read_to_string(&self.store_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };

        let merged = merge_authorized_keys(&existing, key_line);
        std::fs::write(&self.store_path, merged).map_err(io_err)?;
        set_mode(&self.store_path, 0o600).map_err(io_err)?;
        info!(path = %self.store_path.display(), "engine SSH key installed");

        self.refresh_security_context();
        Ok(())
    }

    /// Refresh mandatory-access-control labels on the store directory.
    /// Failure leaves the credential usable, so it is only a warning.
    fn refresh_security_context(&self) {
        if !Path::new("/sys/fs/selinux/enforce").exists() {
            debug!("SELinux not enabled, skipping relabel");
            return;
        }
        let Some(dir) = self.store_path.parent() else {
            return;
        };
        match Command::new("restorecon").arg("-R").arg(dir).output() {
            Ok(output) if output.status.success() => {
                debug!(path = %dir.display(), "security context refreshed");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(path = %dir.display(), %stderr, "failed to refresh security context");
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to run restorecon");
            }
        }
    }
}

/// Merge one authorized_keys line into existing store content.
///
/// Lines are matched on key type and blob, so a re-issued key with a
/// different comment replaces its predecessor instead of piling up.
#[must_use]
pub fn merge_authorized_keys(existing: &str, key_line: &str) -> String {
    let new_id = key_identity(key_line);
    let mut lines: Vec<&str> = Vec::new();
    let mut replaced = false;

    for line in existing.lines() {
        if key_identity(line).is_some() && key_identity(line) == new_id {
            if !replaced {
                lines.push(key_line);
                replaced = true;
            }
        } else {
            lines.push(line);
        }
    }
    if !replaced {
        lines.push(key_line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// (key type, base64 blob) of an authorized_keys line, ignoring the
/// comment field. Returns None for blanks and comments.
fn key_identity(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    Some((fields.next()?, fields.next()?))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE_KEY: &str = "ssh-rsa AAAAB3NzaEngine engine@mgmt.example.org";

    #[test]
    fn test_merge_into_empty_store() {
        let merged = merge_authorized_keys("", ENGINE_KEY);
        assert_eq!(merged, format!("{ENGINE_KEY}\n"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_authorized_keys("", ENGINE_KEY);
        let twice = merge_authorized_keys(&once, ENGINE_KEY);
        assert_eq!(once, twice);
        assert_eq!(twice.matches("AAAAB3NzaEngine").count(), 1);
    }

    #[test]
    fn test_merge_preserves_unrelated_entries() {
        let existing = "ssh-ed25519 AAAAOperator operator@laptop\n# backup key\nssh-rsa AAAABackup backup\n";
        let merged = merge_authorized_keys(existing, ENGINE_KEY);
        assert!(merged.contains("AAAAOperator"));
        assert!(merged.contains("# backup key"));
        assert!(merged.contains("AAAABackup"));
        assert!(merged.ends_with(&format!("{ENGINE_KEY}\n")));
    }

    #[test]
    fn test_merge_replaces_reissued_key() {
        let old = "ssh-rsa AAAAB3NzaEngine engine@old-name\n";
        let merged = merge_authorized_keys(old, ENGINE_KEY);
        assert_eq!(merged.matches("AAAAB3NzaEngine").count(), 1);
        assert!(merged.contains("engine@mgmt.example.org"));
        assert!(!merged.contains("engine@old-name"));
    }

    #[cfg(unix)]
    #[test]
    fn test_store_permissions_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("authorized_keys");
        std::fs::write(&store, "ssh-rsa AAAAOld old\n").unwrap();
        std::fs::set_permissions(&store, std::fs::Permissions::from_mode(0o644)).unwrap();

        // Rewrite through the same path the provisioner uses.
        let merged = merge_authorized_keys(
            &std::fs::read_to_string(&store).unwrap(),
            ENGINE_KEY,
        );
        std::fs::write(&store, merged).unwrap();
        set_mode(&store, 0o600).unwrap();

        let mode = std::fs::metadata(&store).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
