//! Command-line argument definitions using clap.

use clap::Parser;
use std::path::PathBuf;

/// Sync vendor root stores and build signed trust anchor bundles.
///
/// Each run resolves the Apple, Google, Microsoft and Mozilla feeds,
/// rebuilds the bundles whose upstream changed, derives the intersection
/// bundle, and commits bundle_metadata.json in WORKDIR.
///
/// Touch WORKDIR/.force_update to force a full rebuild on the next run.
#[derive(Parser, Debug)]
#[command(name = "rootca")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding bundles, metadata and caches
    #[arg(default_value = "bundles")]
    pub workdir: PathBuf,

    /// Rebuild every bundle even if nothing changed upstream
    #[arg(short, long)]
    pub force_update: bool,

    /// PEM public key used to verify signatures
    #[arg(long, requires = "private_key_path")]
    pub public_key_path: Option<PathBuf>,

    /// PEM EC private key used to sign artifacts
    #[arg(long, requires = "public_key_path")]
    pub private_key_path: Option<PathBuf>,

    /// Base64 DER public key (used when no key paths are given)
    #[arg(long, env = "ROOTCA_SIGNING_PUBLIC_KEY", hide_env_values = true)]
    pub public_key: Option<String>,

    /// Base64 DER EC private key (used when no key paths are given)
    #[arg(long, env = "ROOTCA_SIGNING_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// GitHub token for api.github.com requests
    #[arg(long, env = "GITHUB_ACCESS_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// openssl binary to run (overrides config)
    #[arg(long)]
    pub openssl_path: Option<PathBuf>,

    /// Config file (defaults to the per-user config location)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Abort the run after this many seconds (overrides config)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Increase verbosity
    #[arg(short, long)]
    pub verbose: bool,
}
