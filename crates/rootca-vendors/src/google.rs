//! Chrome Root Store, read from the chromium repository on GitHub.

use async_trait::async_trait;
use rootca_client::{Fetch, HttpFetcher};
use rootca_core::{split_pem_certificates, CertificateRef, Resolution, Result, RootcaError, VendorSource};
use tracing::{debug, error};

use crate::github::{latest_commit, Commit};

/// Metadata key.
pub const GOOGLE: &str = "google";

/// Author e-mail domains allowed to change the root store file.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &["chromium.org", "google.com"];

const STORE_PATH: &str = "net/data/ssl/chrome_root_store/root_store.certs";
const DEFAULT_API_BASE: &str = "https://api.github.com/repos/chromium/chromium";
const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com/chromium/chromium";

/// Google feed. The change key is the latest commit touching the store file.
#[derive(Clone)]
pub struct GoogleSource {
    fetcher: HttpFetcher,
    api_base: String,
    raw_base: String,
    allowed_domains: Vec<String>,
}

impl GoogleSource {
    /// Source reading from GitHub with the default author allow-list.
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            api_base: DEFAULT_API_BASE.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            allowed_domains: DEFAULT_ALLOWED_DOMAINS.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    /// Override the repository API and raw content base URLs.
    #[must_use]
    pub fn with_urls(mut self, api_base: impl Into<String>, raw_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.raw_base = raw_base.into();
        self
    }

    /// Replace the author e-mail domain allow-list.
    #[must_use]
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains
            .into_iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();
        self
    }

    /// Reject commits whose author is not on the allow-list.
    fn check_provenance(&self, commit: &Commit) -> Result<()> {
        let allowed = commit.author_domain().is_some_and(|domain| {
            self.allowed_domains
                .iter()
                .any(|d| domain == *d || domain.ends_with(&format!(".{d}")))
        });
        if allowed {
            return Ok(());
        }

        error!(
            vendor = GOOGLE,
            sha = %commit.sha,
            author = %commit.commit.author.email,
            "root store commit by unexpected author"
        );
        Err(RootcaError::Provenance {
            vendor: GOOGLE.to_string(),
            identity: commit.commit.author.email.clone(),
        })
    }
}

#[async_trait]
impl VendorSource for GoogleSource {
    fn name(&self) -> &str {
        GOOGLE
    }

    async fn resolve(&self) -> Result<Resolution> {
        let commits_url = format!("{}/commits?path={STORE_PATH}&per_page=1", self.api_base);
        let commit = latest_commit(&self.fetcher, &commits_url, GOOGLE).await?;
        self.check_provenance(&commit)?;

        let store_url = format!("{}/{}/{STORE_PATH}", self.raw_base, commit.sha);
        let document = self.fetcher.get_bytes(&store_url).await?;
        let certificates = split_pem_certificates(&document)?;
        if certificates.is_empty() {
            return Err(RootcaError::feed(GOOGLE, "no certificates in root store file"));
        }
        debug!(vendor = GOOGLE, sha = %commit.sha, certificates = certificates.len(), "resolved feed");

        Ok(Resolution {
            source_date: Some(commit.commit.author.date),
            change_key: commit.sha,
            wanted: certificates
                .into_iter()
                .map(|der| CertificateRef::Inline { der })
                .collect(),
        })
    }

    async fn fetch(&self, _reference: &CertificateRef) -> Result<Vec<u8>> {
        Err(RootcaError::feed(
            GOOGLE,
            "certificates are delivered inline, nothing to fetch",
        ))
    }
}
