//! # rootca-cli
//!
//! Command-line runner for the rootca pipeline.
//!
//! One invocation is one run: every vendor feed is resolved, changed bundles
//! are rebuilt and signed, the intersection bundle is derived, and
//! `bundle_metadata.json` is committed. A non-zero exit means nothing new
//! was committed.

pub mod cli;
pub mod config;

pub use cli::run;
