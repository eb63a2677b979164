//! Persistence of `bundle_metadata.json`.

use rootca_core::{BundleMetadata, Result, RootcaError};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// File name of the metadata record in the working directory.
pub const METADATA_FILE_NAME: &str = "bundle_metadata.json";

/// Suffix of the staging file renamed over the live record.
const STAGING_SUFFIX: &str = "_atomic";

/// Reads and atomically replaces the metadata record.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Store for the record inside `workdir`.
    pub fn new(workdir: impl AsRef<Path>) -> Self {
        Self {
            path: workdir.as_ref().join(METADATA_FILE_NAME),
        }
    }

    /// Path of the live record.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(STAGING_SUFFIX);
        PathBuf::from(name)
    }

    /// Load the record, or `None` if there has never been a successful run.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the file exists but cannot be read, or
    /// `RootcaError::Json` if it is not valid metadata.
    pub async fn load(&self) -> Result<Option<BundleMetadata>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => {
                let metadata: BundleMetadata = serde_json::from_slice(&data)?;
                debug!(path = %self.path.display(), vendors = metadata.len(), "loaded metadata");
                Ok(Some(metadata))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RootcaError::io(&self.path, e)),
        }
    }

    /// Replace the record with `metadata`.
    ///
    /// A crash at any point leaves either the old record or the new one
    /// readable, never a mix.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Persistence` if writing or renaming fails.
    pub async fn save(&self, metadata: &BundleMetadata) -> Result<()> {
        let staged = self.stage(metadata).await?;
        self.commit(&staged).await?;
        info!(path = %self.path.display(), vendors = metadata.len(), "metadata saved");
        Ok(())
    }

    /// Write the full record to the staging file and flush it to disk.
    async fn stage(&self, metadata: &BundleMetadata) -> Result<PathBuf> {
        let staging = self.staging_path();
        let json = serde_json::to_vec_pretty(metadata)?;

        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| RootcaError::persistence(&staging, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| RootcaError::persistence(&staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| RootcaError::persistence(&staging, e))?;
        Ok(staging)
    }

    async fn commit(&self, staged: &Path) -> Result<()> {
        tokio::fs::rename(staged, &self.path)
            .await
            .map_err(|e| RootcaError::persistence(&self.path, e))
    }
}
