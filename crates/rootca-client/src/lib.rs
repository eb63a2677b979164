//! HTTP client for rootca vendor feeds.
//!
//! This crate provides [`HttpFetcher`], the transport the vendor sources use
//! to read upstream feeds and download individual certificates, behind the
//! narrow [`Fetch`] trait.

mod client;

pub use client::{Fetch, HttpFetcher, HttpFetcherBuilder, GITHUB_API_HOST};
pub use rootca_core::{Result, RootcaError};
