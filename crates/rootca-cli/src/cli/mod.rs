//! CLI argument parsing and run dispatch.

pub mod args;

use anyhow::{bail, Result};
use args::Cli;
use clap::Parser;
use rootca_client::HttpFetcher;
use rootca_sync::{
    IntersectionSpec, OpenSsl, OpenSslCodec, OpenSslSigner, Orchestrator, RunSummary, Signer,
    SigningKeys, SyncOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Run the CLI application.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    let mut fetcher = HttpFetcher::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs));
    if let Some(token) = cli.github_token.as_deref().filter(|t| !t.is_empty()) {
        fetcher = fetcher.github_token(token);
    }
    let fetcher = fetcher.build()?;

    let openssl = OpenSsl::new(
        cli.openssl_path
            .clone()
            .unwrap_or_else(|| config.openssl_path.clone()),
    );
    let signer = signer(&cli, &openssl)?;

    let deadline_secs = cli.deadline_secs.unwrap_or(config.run_deadline_secs);
    let options = SyncOptions {
        workdir: cli.workdir.clone(),
        force: cli.force_update,
        run_deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
    };

    let mut orchestrator = Orchestrator::new(options, Arc::new(OpenSslCodec::new(openssl)))
        .with_intersection(IntersectionSpec::default())
        .with_signer(signer);
    for source in rootca_vendors::default_sources(&fetcher, &cli.workdir, config.google_domains()) {
        orchestrator = orchestrator.with_source(source);
    }

    info!(workdir = %cli.workdir.display(), force = cli.force_update, "starting run");
    let summary = orchestrator.run().await?;
    print_summary(&summary);

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let ansi = std::env::var("GITHUB_ACTIONS").map_or(true, |v| v != "true");

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .init();
}

/// Signing key pair from files, or from base64 values, or none at all.
fn signer(cli: &Cli, openssl: &OpenSsl) -> Result<Option<Arc<dyn Signer>>> {
    let keys = match (
        &cli.public_key_path,
        &cli.private_key_path,
        non_empty(cli.public_key.as_deref()),
        non_empty(cli.private_key.as_deref()),
    ) {
        (Some(public), Some(private), _, _) => SigningKeys::from_files(public, private)?,
        (None, None, Some(public), Some(private)) => SigningKeys::from_base64(public, private)?,
        (None, None, None, None) => {
            warn!("no signing keys configured, artifacts will not be signed");
            return Ok(None);
        }
        _ => bail!("signing needs both a public and a private key"),
    };

    Ok(Some(Arc::new(OpenSslSigner::new(openssl.clone(), keys))))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        println!(
            "{:<12} {:<28} certs={:<4} key={}",
            outcome.name, outcome.determination, outcome.metadata.num_certs, outcome.metadata.key
        );
    }
    println!(
        "{} of {} bundles rebuilt",
        summary.rebuilt(),
        summary.outcomes.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rootca").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_keys_means_no_signer() {
        let mut cli = parse(&[]);
        cli.public_key = None;
        cli.private_key = None;
        assert!(signer(&cli, &OpenSsl::default()).unwrap().is_none());
    }

    #[test]
    fn test_single_base64_key_is_error() {
        let mut cli = parse(&[]);
        cli.public_key = Some("AAAA".to_string());
        cli.private_key = Some("  ".to_string());
        assert!(signer(&cli, &OpenSsl::default()).is_err());
    }

    #[test]
    fn test_missing_key_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cli = parse(&[]);
        cli.public_key_path = Some(dir.path().join("pub.pem"));
        cli.private_key_path = Some(dir.path().join("key.pem"));
        assert!(signer(&cli, &OpenSsl::default()).is_err());
    }
}
