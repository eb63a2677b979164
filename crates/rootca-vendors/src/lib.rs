//! Vendor feeds for rootca.
//!
//! Each module implements [`VendorSource`] for one root program:
//!
//! | vendor    | feed                                   | change key                      |
//! |-----------|----------------------------------------|---------------------------------|
//! | Apple     | support page trust table + crt.sh      | hash of the listed fingerprints |
//! | Google    | chromium `root_store.certs` on GitHub  | latest commit SHA               |
//! | Microsoft | CCADB report + Windows Update download | hash of the CSV report          |
//! | Mozilla   | curl.se `cacert.pem`                   | published document SHA-256      |

pub mod apple;
pub mod github;
pub mod google;
pub mod microsoft;
pub mod mozilla;

use rootca_client::HttpFetcher;
use rootca_core::VendorSource;
use std::path::Path;
use std::sync::Arc;

pub use apple::AppleSource;
pub use google::GoogleSource;
pub use microsoft::MicrosoftSource;
pub use mozilla::MozillaSource;

/// Every built-in vendor, in intersection order.
///
/// `allowed_domains` replaces the Google author allow-list when given.
pub fn default_sources(
    fetcher: &HttpFetcher,
    workdir: &Path,
    allowed_domains: Option<Vec<String>>,
) -> Vec<Arc<dyn VendorSource>> {
    let mut google = GoogleSource::new(fetcher.clone());
    if let Some(domains) = allowed_domains {
        google = google.with_allowed_domains(domains);
    }

    vec![
        Arc::new(AppleSource::new(fetcher.clone())),
        Arc::new(google),
        Arc::new(MicrosoftSource::new(fetcher.clone(), workdir)),
        Arc::new(MozillaSource::new(fetcher.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sources_names() {
        let fetcher = HttpFetcher::new().unwrap();
        let sources = default_sources(&fetcher, Path::new("bundles"), None);
        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["apple", "google", "microsoft", "mozilla"]);
        assert_eq!(sources[3].bundle_name(), "mozilla_ca_bundle");
    }
}
