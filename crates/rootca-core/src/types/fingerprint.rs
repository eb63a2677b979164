//! Certificate fingerprints and fingerprint sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RootcaError};
use crate::hash::sha256_hex;

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LEN: usize = 64;

/// SHA-256 fingerprint of a certificate's DER encoding.
///
/// Always stored as upper-case hex. Because the width is fixed and the
/// alphabet is `0-9A-F`, string ordering matches ordering of the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a fingerprint, tolerating lower case and `:`/space separators.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::CertParse` if the value is not 32 bytes of hex.
    pub fn parse(value: &str) -> Result<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !matches!(c, ':' | '\u{a0}') && !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != SHA256_HEX_LEN || !normalized.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(RootcaError::CertParse(format!(
                "invalid SHA-256 fingerprint: {value}"
            )));
        }

        Ok(Self(normalized))
    }

    /// Fingerprint of DER-encoded certificate bytes.
    #[must_use]
    pub fn of_der(der: &[u8]) -> Self {
        Self(sha256_hex(der))
    }

    /// Upper-case hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // Validated as hex on construction.
        hex::decode(&self.0).unwrap_or_default()
    }

    /// First 16 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = RootcaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = RootcaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// The set of certificate fingerprints wanted for one bundle build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbprintSet(BTreeSet<Fingerprint>);

impl ThumbprintSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, fp: Fingerprint) -> bool {
        self.0.insert(fp)
    }

    /// Remove a fingerprint.
    pub fn remove(&mut self, fp: &Fingerprint) -> bool {
        self.0.remove(fp)
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.0.contains(fp)
    }

    /// Number of fingerprints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no fingerprints are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fingerprints in descending byte order, the published bundle order.
    pub fn descending(&self) -> impl Iterator<Item = &Fingerprint> {
        self.0.iter().rev()
    }

    /// Canonical change key: descending raw fingerprints, concatenated, SHA-256.
    #[must_use]
    pub fn change_key(&self) -> String {
        let mut material = Vec::with_capacity(self.0.len() * 32);
        for fp in self.descending() {
            material.extend_from_slice(&fp.to_bytes());
        }
        sha256_hex(&material)
    }
}

impl FromIterator<Fingerprint> for ThumbprintSet {
    fn from_iter<I: IntoIterator<Item = Fingerprint>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ThumbprintSet {
    type Item = &'a Fingerprint;
    type IntoIter = std::collections::btree_set::Iter<'a, Fingerprint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
