//! Trust anchor records and PEM/DER helpers.

use chrono::{DateTime, TimeZone, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use serde::{Deserialize, Serialize};
use x509_parser::extensions::ParsedExtension;

use crate::error::{Result, RootcaError};
use crate::hash::{sha1_hex, sha256_hex};
use crate::types::Fingerprint;

/// PEM tag for X.509 certificates.
const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// A single trust anchor, decoded from its DER encoding.
///
/// Immutable once built; identity is the SHA-256 fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Raw DER bytes
    #[serde(skip)]
    pub der: Vec<u8>,
    /// SHA-256 fingerprint of the DER bytes
    pub fingerprint: Fingerprint,
    /// SHA-1 fingerprint (legacy vendor identifiers)
    pub sha1: String,
    /// Subject distinguished name (human-readable)
    pub subject: String,
    /// Serial number (hex)
    pub serial: String,
    /// Not valid before
    pub not_before: DateTime<Utc>,
    /// Not valid after
    pub not_after: DateTime<Utc>,
    /// Subject key identifier (upper-case hex), if the extension is present
    pub subject_key_id: Option<String>,
    /// SHA-256 of the SubjectPublicKeyInfo, fallback cross-reference key
    pub spki_sha256: String,
}

impl CertificateRecord {
    /// Decode a DER-encoded X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::CertParse` if the bytes are not a certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| RootcaError::CertParse(e.to_string()))?;

        let subject_key_id = cert.extensions().iter().find_map(|ext| {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(kid) => Some(hex::encode_upper(kid.0)),
                _ => None,
            }
        });

        Ok(Self {
            der: der.to_vec(),
            fingerprint: Fingerprint::of_der(der),
            sha1: sha1_hex(der),
            subject: cert.subject().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: asn1_to_utc(cert.validity().not_before),
            not_after: asn1_to_utc(cert.validity().not_after),
            subject_key_id,
            spki_sha256: sha256_hex(cert.public_key().raw),
        })
    }

    /// Decode a certificate from either PEM or DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::CertParse` if no certificate can be decoded.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_der(&decode_certificate(data)?)
    }

    /// Key used to match the same CA across vendors.
    ///
    /// Vendors may re-encode a CA certificate with incidental byte
    /// differences, so the content hash is not stable across bundles.
    /// The subject key identifier is; certificates without one fall back
    /// to the public key hash.
    #[must_use]
    pub fn cross_reference_key(&self) -> String {
        self.subject_key_id
            .clone()
            .unwrap_or_else(|| format!("spki:{}", self.spki_sha256))
    }

    /// Whether the certificate is expired, or will be within `days`.
    #[must_use]
    pub fn expires_within(&self, days: i64, now: DateTime<Utc>) -> bool {
        self.not_after - now < chrono::Duration::days(days)
    }

    /// PEM encoding with LF line endings.
    #[must_use]
    pub fn to_pem(&self) -> String {
        encode_pem(&self.der)
    }
}

/// Extract DER from a single certificate that may be PEM-armored.
///
/// PEM input may carry any amount of text before the armor, as in
/// `openssl x509 -text` output or commented store files. The first
/// `CERTIFICATE` block is returned.
///
/// # Errors
///
/// Returns `RootcaError::CertParse` if PEM armor is present but invalid,
/// or if no PEM block is a certificate.
pub fn decode_certificate(data: &[u8]) -> Result<Vec<u8>> {
    if !has_pem_armor(data) {
        return Ok(data.to_vec());
    }

    let blocks = pem::parse_many(data).map_err(|e| RootcaError::CertParse(e.to_string()))?;
    let tags: Vec<String> = blocks.iter().map(|b| b.tag().to_string()).collect();
    blocks
        .into_iter()
        .find(|b| b.tag() == CERTIFICATE_TAG)
        .map(Pem::into_contents)
        .ok_or_else(|| {
            RootcaError::CertParse(format!("no certificate among PEM blocks {tags:?}"))
        })
}

/// Split a PEM document into the DER of every certificate block.
///
/// Non-certificate blocks and text between blocks are ignored.
///
/// # Errors
///
/// Returns `RootcaError::CertParse` if the PEM armor is malformed.
pub fn split_pem_certificates(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let blocks = pem::parse_many(data).map_err(|e| RootcaError::CertParse(e.to_string()))?;
    Ok(blocks
        .into_iter()
        .filter(|p| p.tag() == CERTIFICATE_TAG)
        .map(Pem::into_contents)
        .collect())
}

/// PEM-encode DER certificate bytes with LF line endings.
#[must_use]
pub fn encode_pem(der: &[u8]) -> String {
    let block = Pem::new(CERTIFICATE_TAG, der.to_vec());
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

fn has_pem_armor(data: &[u8]) -> bool {
    const ARMOR: &[u8] = b"-----BEGIN ";
    data.windows(ARMOR.len()).any(|w| w == ARMOR)
}

/// Convert an ASN.1 `GeneralizedTime` / `UTCTime` to `DateTime<Utc>`.
fn asn1_to_utc(t: x509_parser::time::ASN1Time) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
