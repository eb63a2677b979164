//! Mozilla root program, via the curl project's `cacert.pem` export.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::bytes::Regex;
use rootca_client::{Fetch, HttpFetcher};
use rootca_core::hash::sha256_hex;
use rootca_core::{
    split_pem_certificates, CertificateRef, Resolution, Result, RootcaError, VendorSource,
};
use tracing::{debug, warn};

/// Metadata key.
pub const MOZILLA: &str = "mozilla";

const DEFAULT_BUNDLE_URL: &str = "https://curl.se/ca/cacert.pem";
const DEFAULT_DIGEST_URL: &str = "https://curl.se/ca/cacert.pem.sha256";

const DATE_LINE: &str = r"## Certificate data from Mozilla as of: ([A-Za-z0-9 :]+)";

/// Mozilla feed. The change key is the published SHA-256 of `cacert.pem`.
#[derive(Clone)]
pub struct MozillaSource {
    fetcher: HttpFetcher,
    bundle_url: String,
    digest_url: String,
}

impl MozillaSource {
    /// Source reading from curl.se.
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            bundle_url: DEFAULT_BUNDLE_URL.to_string(),
            digest_url: DEFAULT_DIGEST_URL.to_string(),
        }
    }

    /// Override the document and digest URLs.
    #[must_use]
    pub fn with_urls(mut self, bundle_url: impl Into<String>, digest_url: impl Into<String>) -> Self {
        self.bundle_url = bundle_url.into();
        self.digest_url = digest_url.into();
        self
    }
}

#[async_trait]
impl VendorSource for MozillaSource {
    fn name(&self) -> &str {
        MOZILLA
    }

    async fn resolve(&self) -> Result<Resolution> {
        let digest_text = self.fetcher.get_text(&self.digest_url).await?;
        let published = digest_text
            .split_whitespace()
            .next()
            .ok_or_else(|| RootcaError::feed(MOZILLA, "empty digest document"))?
            .to_string();

        let document = self.fetcher.get_bytes(&self.bundle_url).await?;
        let actual = sha256_hex(&document);
        if !actual.eq_ignore_ascii_case(&published) {
            return Err(RootcaError::Verification {
                expected: published,
                actual,
            });
        }

        let certificates = split_pem_certificates(&document)?;
        if certificates.is_empty() {
            return Err(RootcaError::feed(MOZILLA, "no certificates in cacert.pem"));
        }

        let source_date = source_date(&document);
        if source_date.is_none() {
            warn!(vendor = MOZILLA, "could not read data date from cacert.pem");
        }
        debug!(vendor = MOZILLA, certificates = certificates.len(), key = %published, "resolved feed");

        Ok(Resolution {
            change_key: published,
            source_date,
            wanted: certificates
                .into_iter()
                .map(|der| CertificateRef::Inline { der })
                .collect(),
        })
    }

    async fn fetch(&self, _reference: &CertificateRef) -> Result<Vec<u8>> {
        Err(RootcaError::feed(
            MOZILLA,
            "certificates are delivered inline, nothing to fetch",
        ))
    }
}

/// Date from the `## Certificate data from Mozilla as of:` header line,
/// e.g. `Tue Mar 11 04:12:04 2025 GMT`.
fn source_date(document: &[u8]) -> Option<DateTime<Utc>> {
    let pattern = Regex::new(DATE_LINE).ok()?;
    let captured = pattern.captures(document)?.get(1)?;
    let text = std::str::from_utf8(captured.as_bytes()).ok()?;
    let tokens: Vec<&str> = text
        .split_whitespace()
        .filter(|t| *t != "GMT" && *t != "UTC")
        .collect();
    NaiveDateTime::parse_from_str(&tokens.join(" "), "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}
