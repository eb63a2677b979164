//! GitHub commits API types.

use chrono::{DateTime, Utc};
use rootca_client::HttpFetcher;
use rootca_core::{Result, RootcaError};
use serde::Deserialize;
use tracing::debug;

/// One entry of `GET /repos/{owner}/{repo}/commits`.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    /// Commit hash
    pub sha: String,
    /// Git commit details
    pub commit: CommitDetail,
}

/// The `commit` object of a commits API entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    /// Author as recorded by git
    pub author: CommitAuthor,
}

/// Git author identity.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    /// Author name
    #[serde(default)]
    pub name: String,
    /// Author e-mail
    #[serde(default)]
    pub email: String,
    /// Author date
    pub date: DateTime<Utc>,
}

impl Commit {
    /// Domain part of the author e-mail, lower-cased.
    #[must_use]
    pub fn author_domain(&self) -> Option<String> {
        self.commit
            .author
            .email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
    }
}

/// Most recent commit returned by a commits API `url`.
pub async fn latest_commit(fetcher: &HttpFetcher, url: &str, vendor: &str) -> Result<Commit> {
    let commits: Vec<Commit> = fetcher.get_json(url).await?;
    let commit = commits
        .into_iter()
        .next()
        .ok_or_else(|| RootcaError::feed(vendor, "commits API returned no commits"))?;
    debug!(vendor = %vendor, sha = %commit.sha, "latest upstream commit");
    Ok(commit)
}
