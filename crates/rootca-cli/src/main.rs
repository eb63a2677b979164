//! rootca - trust anchor bundle sync
//!
//! Pulls the root stores of the major vendors and publishes signed bundles.

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    rootca_cli::run().await
}
