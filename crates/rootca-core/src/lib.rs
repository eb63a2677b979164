//! Core types and traits for rootca.
//!
//! This crate provides the foundational pieces shared by the pipeline,
//! the vendor adapters and the CLI:
//!
//! - **Types**: certificates, fingerprints, build metadata
//! - **Errors**: the run-level error taxonomy in [`RootcaError`]
//! - **Sources**: the [`VendorSource`] interface every vendor implements
//!
//! # Example
//!
//! ```rust,ignore
//! use rootca_core::{Fingerprint, ThumbprintSet};
//!
//! let set: ThumbprintSet = fingerprints.into_iter().collect();
//! println!("change key: {}", set.change_key());
//! ```

mod error;
pub mod hash;
pub mod types;

pub use error::{Result, RootcaError};
pub use types::*;
