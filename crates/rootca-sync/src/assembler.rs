//! Bundle assembly: a set of cached certificates in, two artifacts out.

use chrono::{DateTime, Utc};
use rootca_core::hash::file_fingerprints;
use rootca_core::{
    decode_certificate, encode_pem, BundleFingerprint, Fingerprint, Result, RootcaError,
    VendorMetadata,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::BundleCodec;

/// Extension of the combined signed-container artifact.
pub const P7B_EXTENSION: &str = "p7b";
/// Extension of the concatenated PEM artifact.
pub const PEM_EXTENSION: &str = "pem";

/// Paths of the `.p7b` and `.pem` artifacts for `bundle` in `dir`.
#[must_use]
pub fn artifact_paths(dir: &Path, bundle: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{bundle}.{P7B_EXTENSION}")),
        dir.join(format!("{bundle}.{PEM_EXTENSION}")),
    )
}

/// Whether both artifacts for `bundle` exist in `dir`.
pub async fn artifacts_present(dir: &Path, bundle: &str) -> bool {
    let (p7b, pem) = artifact_paths(dir, bundle);
    tokio::fs::try_exists(&p7b).await.unwrap_or(false)
        && tokio::fs::try_exists(&pem).await.unwrap_or(false)
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    /// Bundle base name
    pub name: String,
    /// Included certificates, in bundle order (descending)
    pub fingerprints: Vec<Fingerprint>,
    /// Digests of the `.p7b` artifact
    pub p7b: BundleFingerprint,
    /// Digests of the `.pem` artifact
    pub pem: BundleFingerprint,
}

impl BuiltBundle {
    /// Number of certificates in the bundle.
    #[must_use]
    pub fn count(&self) -> usize {
        self.fingerprints.len()
    }

    /// Artifact file name to digests, as recorded in the metadata file.
    #[must_use]
    pub fn artifacts(&self) -> BTreeMap<String, BundleFingerprint> {
        BTreeMap::from([
            (format!("{}.{P7B_EXTENSION}", self.name), self.p7b.clone()),
            (format!("{}.{PEM_EXTENSION}", self.name), self.pem.clone()),
        ])
    }

    /// Build record for this bundle under `change_key`.
    #[must_use]
    pub fn into_metadata(self, change_key: String, date: DateTime<Utc>) -> VendorMetadata {
        VendorMetadata {
            date,
            key: change_key,
            bundles: self.artifacts(),
            num_certs: self.count(),
        }
    }
}

/// Builds bundle artifacts from certificate files.
#[derive(Clone)]
pub struct BundleAssembler {
    codec: Arc<dyn BundleCodec>,
    output_dir: PathBuf,
}

impl BundleAssembler {
    /// Create an assembler writing into `output_dir`.
    pub fn new(codec: Arc<dyn BundleCodec>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            output_dir: output_dir.into(),
        }
    }

    /// Build `<name>.p7b` and `<name>.pem` from the certificates at `cert_paths`.
    ///
    /// Certificates are de-duplicated by fingerprint and ordered by
    /// fingerprint, descending, so identical sets always produce identical
    /// artifacts. Both artifacts are written to temp names and renamed into
    /// place only once both are complete; on failure the previous
    /// artifacts are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::EmptyBundle` for an empty input,
    /// `RootcaError::Encoding` if the codec fails, or `RootcaError::Io` on
    /// filesystem errors.
    pub async fn build(&self, cert_paths: &[PathBuf], name: &str) -> Result<BuiltBundle> {
        if cert_paths.is_empty() {
            return Err(RootcaError::EmptyBundle {
                bundle: name.to_string(),
            });
        }

        let mut certificates: BTreeMap<Fingerprint, (PathBuf, Vec<u8>)> = BTreeMap::new();
        for path in cert_paths {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| RootcaError::io(path, e))?;
            let der = decode_certificate(&data)?;
            certificates
                .entry(Fingerprint::of_der(&der))
                .or_insert_with(|| (path.clone(), der));
        }

        let ordered: Vec<(&Fingerprint, &(PathBuf, Vec<u8>))> = certificates.iter().rev().collect();
        debug!(bundle = %name, count = ordered.len(), "assembling bundle");

        let (p7b, pem) = artifact_paths(&self.output_dir, name);
        let p7b_tmp = tmp_path(&p7b);
        let pem_tmp = tmp_path(&pem);

        let staged = async {
            let paths: Vec<PathBuf> = ordered.iter().map(|(_, (path, _))| path.clone()).collect();
            self.codec.encode(&paths, &p7b_tmp).await?;

            let text: String = ordered.iter().map(|(_, (_, der))| encode_pem(der)).collect();
            tokio::fs::write(&pem_tmp, text)
                .await
                .map_err(|e| RootcaError::io(&pem_tmp, e))?;

            Ok::<_, RootcaError>((file_fingerprints(&p7b_tmp)?, file_fingerprints(&pem_tmp)?))
        }
        .await;

        let (p7b_digest, pem_digest) = match staged {
            Ok(digests) => digests,
            Err(e) => {
                discard(&[&p7b_tmp, &pem_tmp]).await;
                return Err(e);
            }
        };

        for (tmp, dest) in [(&p7b_tmp, &p7b), (&pem_tmp, &pem)] {
            if let Err(e) = tokio::fs::rename(tmp, dest).await {
                discard(&[&p7b_tmp, &pem_tmp]).await;
                return Err(RootcaError::io(dest, e));
            }
        }

        let fingerprints: Vec<Fingerprint> = ordered.into_iter().map(|(fp, _)| fp.clone()).collect();
        info!(bundle = %name, certificates = fingerprints.len(), "bundle written");

        Ok(BuiltBundle {
            name: name.to_string(),
            fingerprints,
            p7b: p7b_digest,
            pem: pem_digest,
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn discard(paths: &[&PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}
