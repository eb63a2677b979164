//! Apple trusted root list, scraped from Apple's support page.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use regex::Regex;
use rootca_client::{Fetch, HttpFetcher};
use rootca_core::{
    CertificateRef, Fingerprint, Resolution, Result, RootcaError, ThumbprintSet, VendorSource,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Metadata key.
pub const APPLE: &str = "apple";

const DEFAULT_PAGE_URL: &str = "https://support.apple.com/en-ca/HT213464";
const DEFAULT_DOWNLOAD_BASE: &str = "https://crt.sh/?d=";

/// crt.sh asks clients to go slow.
const DEFAULT_DOWNLOAD_INTERVAL: Duration = Duration::from_millis(1500);

/// Position of the SHA-256 fingerprint in a row of the trust table.
const FINGERPRINT_CELL: usize = 8;

/// Roots that must never appear in Apple's list. Seeing one means the page
/// is not what we think it is.
pub const DENIED_FINGERPRINTS: &[&str] =
    &["41A235AB60F0643E752A2DB4E914D68C0542167DE9CA28DF25FD79A693C29072"];

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Apple feed. The change key is the canonical hash of the listed fingerprints.
#[derive(Clone)]
pub struct AppleSource {
    fetcher: HttpFetcher,
    page_url: String,
    download_base: String,
    limiter: Arc<Limiter>,
}

impl AppleSource {
    /// Source reading Apple's support page and downloading from crt.sh.
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            page_url: DEFAULT_PAGE_URL.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            limiter: Arc::new(limiter(DEFAULT_DOWNLOAD_INTERVAL)),
        }
    }

    /// Override the page URL and the download prefix (fingerprint is appended).
    #[must_use]
    pub fn with_urls(mut self, page_url: impl Into<String>, download_base: impl Into<String>) -> Self {
        self.page_url = page_url.into();
        self.download_base = download_base.into();
        self
    }

    /// Minimum spacing between certificate downloads.
    #[must_use]
    pub fn with_download_interval(mut self, interval: Duration) -> Self {
        self.limiter = Arc::new(limiter(interval));
        self
    }
}

fn limiter(interval: Duration) -> Limiter {
    let quota = Quota::with_period(interval)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
    RateLimiter::direct(quota)
}

#[async_trait]
impl VendorSource for AppleSource {
    fn name(&self) -> &str {
        APPLE
    }

    async fn resolve(&self) -> Result<Resolution> {
        let page = self.fetcher.get_text(&self.page_url).await?;
        let fingerprints = parse_trust_table(&page)?;
        debug!(vendor = APPLE, certificates = fingerprints.len(), "resolved feed");

        let wanted = fingerprints
            .descending()
            .map(|fp| CertificateRef::remote(format!("{}{fp}", self.download_base), fp.clone()))
            .collect();

        Ok(Resolution {
            change_key: fingerprints.change_key(),
            source_date: None,
            wanted,
        })
    }

    async fn fetch(&self, reference: &CertificateRef) -> Result<Vec<u8>> {
        match reference {
            CertificateRef::Remote { locator, .. } => {
                self.limiter.until_ready().await;
                debug!(vendor = APPLE, url = %locator, "downloading certificate");
                self.fetcher.get_bytes(locator).await
            }
            CertificateRef::Inline { der } => Ok(der.clone()),
        }
    }
}

/// Fingerprints listed in the first table of the page.
fn parse_trust_table(page: &str) -> Result<ThumbprintSet> {
    let pattern = |re: &str| {
        Regex::new(re).map_err(|e| RootcaError::feed(APPLE, format!("bad pattern: {e}")))
    };
    let table_re = pattern(r"(?is)<table\b.*?</table>")?;
    let row_re = pattern(r"(?is)<tr\b.*?</tr>")?;
    let cell_re = pattern(r"(?is)<td\b[^>]*>(.*?)</td>")?;
    let tag_re = pattern(r"(?s)<[^>]*>")?;

    let table = table_re
        .find(page)
        .ok_or_else(|| RootcaError::feed(APPLE, "no table on trust page"))?;

    let mut fingerprints = ThumbprintSet::new();
    for row in row_re.find_iter(table.as_str()) {
        let Some(cell) = cell_re.captures_iter(row.as_str()).nth(FINGERPRINT_CELL) else {
            continue;
        };
        let text = tag_re.replace_all(&cell[1], "").replace("&nbsp;", "");
        let fingerprint = Fingerprint::parse(&text).map_err(|_| {
            RootcaError::feed(APPLE, format!("invalid fingerprint cell {:?}", text.trim()))
        })?;

        if DENIED_FINGERPRINTS.contains(&fingerprint.as_str()) {
            error!(vendor = APPLE, fingerprint = %fingerprint, "denied certificate listed on trust page");
            return Err(RootcaError::Provenance {
                vendor: APPLE.to_string(),
                identity: fingerprint.to_string(),
            });
        }
        fingerprints.insert(fingerprint);
    }

    if fingerprints.is_empty() {
        return Err(RootcaError::feed(APPLE, "trust table lists no certificates"));
    }
    Ok(fingerprints)
}
