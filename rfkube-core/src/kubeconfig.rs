//! Kubeconfig as a checked-out resource
//!
//! Acquiring saves the user's kubeconfig next to itself with a `.backup`
//! suffix; releasing puts it back byte for byte, or removes the file when
//! there was nothing to save.

use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{IoSnafu, Result};

/// What [`KubeconfigGuard::acquire`] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub had_prior: bool,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct KubeconfigGuard {
    path: PathBuf,
    backup: PathBuf,
}

impl KubeconfigGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(".backup");
        Self {
            path,
            backup: PathBuf::from(backup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Save the current kubeconfig. An existing backup from an unfinished run
    /// still holds the user's original and is never overwritten.
    pub fn acquire(&self) -> Result<Checkout> {
        if self.backup.exists() {
            info!(backup = %self.backup.display(), "keeping existing kubeconfig backup");
            return Ok(Checkout {
                had_prior: true,
                backup: Some(self.backup.clone()),
            });
        }
        if self.path.exists() {
            std::fs::copy(&self.path, &self.backup).context(IoSnafu { path: &self.backup })?;
            info!(backup = %self.backup.display(), "backed up kubeconfig");
            return Ok(Checkout {
                had_prior: true,
                backup: Some(self.backup.clone()),
            });
        }
        Ok(Checkout {
            had_prior: false,
            backup: None,
        })
    }

    /// Write the cluster's kubeconfig to the canonical path (mode 0600)
    pub fn install(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(IoSnafu { path: parent })?;
        }
        std::fs::write(&self.path, content).context(IoSnafu { path: &self.path })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .context(IoSnafu { path: &self.path })?;
        }
        Ok(())
    }

    /// Return the kubeconfig to its pre-acquire state
    pub fn release(&self, had_prior: bool) -> Result<()> {
        if self.backup.exists() {
            std::fs::rename(&self.backup, &self.path).context(IoSnafu { path: &self.path })?;
            info!(path = %self.path.display(), "restored kubeconfig from backup");
            return Ok(());
        }
        if had_prior {
            warn!(
                path = %self.path.display(),
                "kubeconfig backup is missing; leaving current kubeconfig in place"
            );
            return Ok(());
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(crate::error::Error::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
