//! Configuration management.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,

    /// Whole-run deadline in seconds. `0` disables it.
    pub run_deadline_secs: u64,

    /// openssl binary.
    pub openssl_path: PathBuf,

    /// Author e-mail domains trusted to change the Chrome root store.
    /// Empty keeps the built-in list.
    pub google_allowed_domains: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            run_deadline_secs: 1800,
            openssl_path: PathBuf::from("openssl"),
            google_allowed_domains: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config file path.
    pub fn path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "tlsinspector", "rootca")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Load configuration from `explicit`, or from the default location.
    ///
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;

        Ok(config)
    }

    /// Allow-list override for the Google feed, if any.
    #[must_use]
    pub fn google_domains(&self) -> Option<Vec<String>> {
        if self.google_allowed_domains.is_empty() {
            None
        } else {
            Some(self.google_allowed_domains.clone())
        }
    }
}
