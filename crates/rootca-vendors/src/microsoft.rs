//! Microsoft trusted root program, via the CCADB report for Microsoft.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rootca_client::{Fetch, HttpFetcher};
use rootca_core::hash::sha256_hex;
use rootca_core::{
    CertificateRecord, CertificateRef, Fingerprint, Resolution, Result, RootcaError,
    VendorSource,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata key.
pub const MICROSOFT: &str = "microsoft";

/// File name of the exclusion list, kept in the working directory.
pub const EXCLUSION_LIST_NAME: &str = ".microsoft_cache.json";

const DEFAULT_REPORT_URL: &str =
    "https://ccadb.my.salesforce-sites.com/microsoft/IncludedCACertificateReportForMSFTCSV";
const DEFAULT_DOWNLOAD_BASE: &str =
    "http://ctldl.windowsupdate.com/msdownload/update/v3/static/trustedr/en";

/// Certificates expiring within this many days are left out.
const EXPIRY_MARGIN_DAYS: i64 = 7;

// Report columns.
const COL_STATUS: usize = 0;
const COL_SHA1: usize = 3;
const COL_SHA256: usize = 4;
const COL_EKU: usize = 5;
const COL_NOT_AFTER: usize = 7;

const SERVER_AUTH_EKU: &str = "Server Authentication";

/// Certificates known to be unusable, skipped on later runs.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ExclusionList {
    #[serde(rename = "excluded_certificates", default)]
    excluded: BTreeSet<String>,
}

impl ExclusionList {
    fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.excluded.contains(fingerprint.as_str())
    }
}

/// One usable row of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReportEntry {
    sha1: String,
    sha256: Fingerprint,
}

/// Microsoft feed. The change key is the SHA-256 of the CSV report.
pub struct MicrosoftSource {
    fetcher: HttpFetcher,
    report_url: String,
    download_base: String,
    exclusion_path: PathBuf,
    exclusions: Mutex<ExclusionList>,
}

impl MicrosoftSource {
    /// Source keeping its exclusion list in `workdir`.
    pub fn new(fetcher: HttpFetcher, workdir: &Path) -> Self {
        Self {
            fetcher,
            report_url: DEFAULT_REPORT_URL.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            exclusion_path: workdir.join(EXCLUSION_LIST_NAME),
            exclusions: Mutex::new(ExclusionList::default()),
        }
    }

    /// Override the report URL and the certificate download base.
    #[must_use]
    pub fn with_urls(mut self, report_url: impl Into<String>, download_base: impl Into<String>) -> Self {
        self.report_url = report_url.into();
        self.download_base = download_base.into();
        self
    }

    fn lock_exclusions(&self) -> std::sync::MutexGuard<'_, ExclusionList> {
        self.exclusions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn load_exclusions(&self) -> ExclusionList {
        match tokio::fs::read(&self.exclusion_path).await {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!(path = %self.exclusion_path.display(), error = %e, "ignoring unreadable exclusion list");
                ExclusionList::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ExclusionList::default(),
            Err(e) => {
                warn!(path = %self.exclusion_path.display(), error = %e, "ignoring unreadable exclusion list");
                ExclusionList::default()
            }
        }
    }

    async fn save_exclusions(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&*self.lock_exclusions())?;
        let mut staging = self.exclusion_path.as_os_str().to_owned();
        staging.push("_atomic");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| RootcaError::persistence(&staging, e))?;
        tokio::fs::rename(&staging, &self.exclusion_path)
            .await
            .map_err(|e| RootcaError::persistence(&self.exclusion_path, e))
    }
}

#[async_trait]
impl VendorSource for MicrosoftSource {
    fn name(&self) -> &str {
        MICROSOFT
    }

    async fn resolve(&self) -> Result<Resolution> {
        let report = self.fetcher.get_bytes(&self.report_url).await?;
        let change_key = sha256_hex(&report);

        let exclusions = self.load_exclusions().await;
        let entries = parse_report(&report, &exclusions, Utc::now())?;
        *self.lock_exclusions() = exclusions;

        if entries.is_empty() {
            return Err(RootcaError::feed(MICROSOFT, "report lists no usable certificates"));
        }
        debug!(vendor = MICROSOFT, certificates = entries.len(), "resolved feed");

        let wanted = entries
            .into_iter()
            .map(|entry| CertificateRef::Remote {
                locator: format!("{}/{}.crt", self.download_base, entry.sha1),
                fingerprint: Some(entry.sha256),
                label: entry.sha1,
            })
            .collect();

        Ok(Resolution {
            change_key,
            source_date: None,
            wanted,
        })
    }

    async fn fetch(&self, reference: &CertificateRef) -> Result<Vec<u8>> {
        match reference {
            CertificateRef::Remote { locator, label, .. } => {
                debug!(vendor = MICROSOFT, id = %label, "downloading certificate");
                self.fetcher.get_bytes(locator).await
            }
            CertificateRef::Inline { der } => Ok(der.clone()),
        }
    }

    fn admit(&self, record: &CertificateRecord) -> bool {
        if record.expires_within(EXPIRY_MARGIN_DAYS, Utc::now()) {
            info!(
                vendor = MICROSOFT,
                fingerprint = %record.fingerprint,
                not_after = %record.not_after,
                "skipping expired or soon-to-expire certificate"
            );
            self.lock_exclusions()
                .excluded
                .insert(record.fingerprint.to_string());
            return false;
        }
        true
    }

    async fn finish(&self) -> Result<()> {
        if let Err(e) = self.save_exclusions().await {
            warn!(vendor = MICROSOFT, error = %e, "failed to save exclusion list (ignoring)");
        }
        Ok(())
    }
}

/// Usable entries of the CCADB report, in report order.
fn parse_report(
    report: &[u8],
    exclusions: &ExclusionList,
    now: DateTime<Utc>,
) -> Result<Vec<ReportEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(report);

    let cutoff = (now + Duration::days(EXPIRY_MARGIN_DAYS)).date_naive();
    let mut entries = Vec::new();

    for row in reader.records() {
        let row = row.map_err(|e| RootcaError::feed(MICROSOFT, format!("malformed report: {e}")))?;
        let column = |i: usize| row.get(i).unwrap_or("").trim();

        if column(COL_STATUS) == "Disabled" {
            continue;
        }
        if !column(COL_EKU).contains(SERVER_AUTH_EKU) {
            continue;
        }
        // e.g. "2025 Jul 23"
        let Ok(not_after) = NaiveDate::parse_from_str(column(COL_NOT_AFTER), "%Y %b %d") else {
            continue;
        };
        if not_after <= cutoff {
            continue;
        }
        let Ok(sha256) = Fingerprint::parse(column(COL_SHA256)) else {
            warn!(vendor = MICROSOFT, value = %column(COL_SHA256), "skipping row with invalid fingerprint");
            continue;
        };
        if exclusions.contains(&sha256) {
            continue;
        }

        entries.push(ReportEntry {
            sha1: column(COL_SHA1).to_ascii_uppercase(),
            sha256,
        });
    }
    Ok(entries)
}
