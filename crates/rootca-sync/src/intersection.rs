//! Cross-vendor intersection: the CAs every listed vendor trusts.

use rootca_core::{encode_pem, CertificateRecord, Fingerprint, Result, RootcaError, ThumbprintSet};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::codec::BundleCodec;

/// The presence mask is a `u64`.
const MAX_VENDORS: usize = 64;

/// Certificates present in every input bundle.
///
/// Representative files live in a scratch directory owned by this value
/// and removed when it is dropped.
#[derive(Debug)]
pub struct Intersection {
    members: Vec<(Fingerprint, PathBuf)>,
    _scratch: TempDir,
}

impl Intersection {
    /// Representative fingerprints, descending.
    #[must_use]
    pub fn fingerprints(&self) -> ThumbprintSet {
        self.members.iter().map(|(fp, _)| fp.clone()).collect()
    }

    /// Paths of the representative certificate files.
    #[must_use]
    pub fn cert_paths(&self) -> Vec<PathBuf> {
        self.members.iter().map(|(_, path)| path.clone()).collect()
    }

    /// Canonical hash over the included fingerprints.
    #[must_use]
    pub fn change_key(&self) -> String {
        self.fingerprints().change_key()
    }

    /// Number of certificates in the intersection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if no certificate is trusted by every vendor.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Default)]
struct Presence {
    mask: u64,
    representative: Option<(Fingerprint, PathBuf)>,
}

/// Computes the [`Intersection`] of already-built vendor bundles.
#[derive(Clone)]
pub struct IntersectionBuilder {
    codec: Arc<dyn BundleCodec>,
}

impl IntersectionBuilder {
    /// Create a builder that decodes bundles with `codec`.
    pub fn new(codec: Arc<dyn BundleCodec>) -> Self {
        Self { codec }
    }

    /// Intersect `bundles`, given as `(vendor, path to combined bundle)`.
    ///
    /// Certificates are matched across vendors by their cross-reference key
    /// rather than by content hash, since vendors may carry differently
    /// encoded copies of the same CA. The file included for a CA is the one
    /// from the first vendor in `bundles`.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Encoding` if a bundle cannot be decoded, or
    /// `RootcaError::Io` if the scratch directory cannot be written.
    pub async fn compute(&self, bundles: &[(String, PathBuf)]) -> Result<Intersection> {
        if bundles.is_empty() || bundles.len() > MAX_VENDORS {
            return Err(RootcaError::Encoding(format!(
                "intersection needs between 1 and {MAX_VENDORS} vendors, got {}",
                bundles.len()
            )));
        }

        let scratch = TempDir::new().map_err(|e| RootcaError::io("<tempdir>", e))?;
        let mut seen: HashMap<String, Presence> = HashMap::new();

        for (index, (vendor, bundle)) in bundles.iter().enumerate() {
            let bit = 1u64 << index;
            let certificates = self.codec.decode(bundle).await?;
            debug!(vendor = %vendor, count = certificates.len(), "extracted vendor bundle");

            for der in certificates {
                let record = match CertificateRecord::from_der(&der) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(vendor = %vendor, error = %e, "skipping unparseable certificate");
                        continue;
                    }
                };

                let presence = seen.entry(record.cross_reference_key()).or_default();
                presence.mask |= bit;
                if index == 0 && presence.representative.is_none() {
                    let path = write_representative(scratch.path(), &record).await?;
                    presence.representative = Some((record.fingerprint, path));
                }
            }
        }

        let full = if bundles.len() == MAX_VENDORS {
            u64::MAX
        } else {
            (1u64 << bundles.len()) - 1
        };

        let mut members: Vec<(Fingerprint, PathBuf)> = seen
            .into_values()
            .filter(|p| p.mask == full)
            .filter_map(|p| p.representative)
            .collect();
        members.sort_by(|a, b| b.0.cmp(&a.0));
        members.dedup_by(|a, b| a.0 == b.0);

        info!(
            vendors = bundles.len(),
            certificates = members.len(),
            "computed trust intersection"
        );

        Ok(Intersection {
            members,
            _scratch: scratch,
        })
    }
}

async fn write_representative(dir: &Path, record: &CertificateRecord) -> Result<PathBuf> {
    let path = dir.join(format!("{}.crt", record.fingerprint));
    tokio::fs::write(&path, record.to_pem())
        .await
        .map_err(|e| RootcaError::io(&path, e))?;
    Ok(path)
}
