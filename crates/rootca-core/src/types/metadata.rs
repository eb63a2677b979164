//! Durable build records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Digests of one output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFingerprint {
    /// SHA-1 (upper-case hex)
    pub sha1: String,
    /// SHA-256 (upper-case hex)
    pub sha256: String,
    /// SHA-512 (upper-case hex)
    pub sha512: String,
}

/// Record of the last successful build for one vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorMetadata {
    /// Date of the upstream data the bundle was built from
    pub date: DateTime<Utc>,
    /// Opaque change key summarizing the upstream state
    pub key: String,
    /// Artifact file name -> digests
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleFingerprint>,
    /// Number of certificates in the bundle
    pub num_certs: usize,
}

/// Aggregate build record, one entry per vendor.
///
/// Serialized as a plain JSON object keyed by vendor name. Rewritten
/// wholesale on every successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleMetadata {
    vendors: BTreeMap<String, VendorMetadata>,
}

impl BundleMetadata {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for one vendor.
    #[must_use]
    pub fn get(&self, vendor: &str) -> Option<&VendorMetadata> {
        self.vendors.get(vendor)
    }

    /// Insert or replace one vendor's metadata.
    pub fn insert(&mut self, vendor: impl Into<String>, metadata: VendorMetadata) {
        self.vendors.insert(vendor.into(), metadata);
    }

    /// Iterate vendors in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &VendorMetadata)> {
        self.vendors.iter()
    }

    /// Number of vendors recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    /// True if no vendor is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}
