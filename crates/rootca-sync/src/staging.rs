//! Per-run staging area.
//!
//! Every artifact, signature and the metadata record a run produces is
//! written below a staging directory inside the workdir. Nothing reaches
//! the published location until the whole run has succeeded, at which
//! point [`Staging::promote`] renames the files into place. Dropping the
//! staging area (on error, deadline or cancellation) discards it.

use rootca_core::{Result, RootcaError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::assembler::{P7B_EXTENSION, PEM_EXTENSION};
use crate::signer::signature_path;

/// Name prefix of staging directories in the workdir.
pub const STAGING_PREFIX: &str = ".staging";

/// Scratch directory for one run, removed when dropped.
#[derive(Debug)]
pub struct Staging {
    dir: TempDir,
    workdir: PathBuf,
}

impl Staging {
    /// Create a fresh staging directory in `workdir`.
    ///
    /// Leftovers from runs that died without cleaning up are removed first.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the directory cannot be created.
    pub async fn create(workdir: &Path) -> Result<Self> {
        remove_stale(workdir).await;

        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(workdir)
            .map_err(|e| RootcaError::io(workdir, e))?;
        debug!(path = %dir.path().display(), "created staging directory");

        Ok(Self {
            dir,
            workdir: workdir.to_path_buf(),
        })
    }

    /// Directory staged files are written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Publish both artifacts of `bundle`, with their signatures.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Persistence` if a rename fails.
    pub async fn promote_bundle(&self, bundle: &str) -> Result<()> {
        for extension in [P7B_EXTENSION, PEM_EXTENSION] {
            self.promote(&format!("{bundle}.{extension}")).await?;
        }
        Ok(())
    }

    /// Publish the staged file `name` and its signature.
    ///
    /// Without a staged signature, a published signature for `name` no
    /// longer matches and is removed.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Persistence` if a rename fails.
    pub async fn promote(&self, name: &str) -> Result<()> {
        let from = self.dir.path().join(name);
        let to = self.workdir.join(name);
        rename(&from, &to).await?;

        let from_sig = signature_path(&from);
        let to_sig = signature_path(&to);
        if tokio::fs::try_exists(&from_sig).await.unwrap_or(false) {
            rename(&from_sig, &to_sig).await?;
        } else {
            match tokio::fs::remove_file(&to_sig).await {
                Ok(()) => warn!(path = %to_sig.display(), "removed stale signature"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(RootcaError::persistence(&to_sig, e)),
            }
        }

        debug!(file = %name, "promoted");
        Ok(())
    }
}

async fn rename(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| RootcaError::persistence(to, e))
}

async fn remove_stale(workdir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(workdir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_staging = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(STAGING_PREFIX));
        if !is_staging {
            continue;
        }
        let path = entry.path();
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            warn!(path = %path.display(), error = %e, "failed to remove stale staging directory");
        } else {
            debug!(path = %path.display(), "removed stale staging directory");
        }
    }
}
