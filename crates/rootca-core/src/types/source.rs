//! The vendor feed interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{CertificateRecord, Fingerprint};

/// A certificate a vendor wants in its bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateRef {
    /// Downloaded on demand through [`VendorSource::fetch`].
    Remote {
        /// Vendor-specific download locator (usually a URL)
        locator: String,
        /// Expected fingerprint, when the feed publishes it in advance
        fingerprint: Option<Fingerprint>,
        /// Human-readable label for logs (e.g. a legacy SHA-1 id)
        label: String,
    },
    /// The feed already handed back the certificate itself.
    Inline {
        /// DER bytes
        der: Vec<u8>,
    },
}

impl CertificateRef {
    /// Reference by locator with a known fingerprint.
    pub fn remote(locator: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self::Remote {
            label: fingerprint.to_string(),
            locator: locator.into(),
            fingerprint: Some(fingerprint),
        }
    }

    /// Fingerprint known before any download, if any.
    #[must_use]
    pub fn expected_fingerprint(&self) -> Option<Fingerprint> {
        match self {
            Self::Remote { fingerprint, .. } => fingerprint.clone(),
            Self::Inline { der } => Some(Fingerprint::of_der(der)),
        }
    }
}

/// Current state of a vendor's upstream feed.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Opaque token compared run-over-run
    pub change_key: String,
    /// Date the upstream data claims, if it publishes one
    pub source_date: Option<DateTime<Utc>>,
    /// Certificates the bundle should contain
    pub wanted: Vec<CertificateRef>,
}

/// One vendor's authoritative trust-anchor feed.
///
/// Implementations perform network reads only. Deciding whether a bundle
/// is current belongs to the orchestrator.
#[async_trait]
pub trait VendorSource: Send + Sync {
    /// Metadata key, e.g. `"mozilla"`.
    fn name(&self) -> &str;

    /// Base file name of the output artifacts.
    fn bundle_name(&self) -> String {
        format!("{}_ca_bundle", self.name())
    }

    /// Fetch the current change key and wanted certificates.
    async fn resolve(&self) -> Result<Resolution>;

    /// Download the bytes (DER or PEM) behind a remote reference.
    async fn fetch(&self, reference: &CertificateRef) -> Result<Vec<u8>>;

    /// Vendor-specific filter applied once a certificate is decoded.
    fn admit(&self, _record: &CertificateRecord) -> bool {
        true
    }

    /// Called after the vendor's bundle was built successfully.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}
