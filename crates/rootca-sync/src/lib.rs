//! Synchronization and build pipeline for rootca trust bundles.
//!
//! The [`Orchestrator`] drives a run: every [`VendorSource`] resolves its
//! upstream feed, certificates are verified into a per-vendor [`CertStore`],
//! the [`BundleAssembler`] writes the artifacts, the [`IntersectionBuilder`]
//! derives the cross-vendor bundle, and the [`MetadataStore`] records the
//! build. All of it lands in a per-run [`Staging`] area first and is
//! published only when the whole run succeeds.
//!
//! Encoding the combined bundle format and producing detached signatures
//! are delegated to the [`BundleCodec`] and [`Signer`] collaborators.
//!
//! # Example
//!
//! ```rust,ignore
//! use rootca_sync::{OpenSslCodec, Orchestrator, SyncOptions};
//! use std::sync::Arc;
//!
//! let summary = Orchestrator::new(SyncOptions::new("bundles"), Arc::new(OpenSslCodec::default()))
//!     .with_source(mozilla)
//!     .run()
//!     .await?;
//! println!("rebuilt {} bundles", summary.rebuilt());
//! ```
//!
//! [`VendorSource`]: rootca_core::VendorSource

mod assembler;
mod codec;
mod intersection;
mod metadata;
mod openssl;
mod orchestrator;
mod signer;
mod staging;
mod store;

#[cfg(test)]
mod testutil;

pub use assembler::{artifact_paths, artifacts_present, BuiltBundle, BundleAssembler};
pub use codec::{BundleCodec, OpenSslCodec};
pub use intersection::{Intersection, IntersectionBuilder};
pub use metadata::{MetadataStore, METADATA_FILE_NAME};
pub use openssl::OpenSsl;
pub use orchestrator::{
    determine, BundleOutcome, Determination, IntersectionSpec, Orchestrator, RebuildReason,
    RunSummary, SyncOptions, CACHE_DIR, FORCE_UPDATE_MARKER,
};
pub use signer::{signature_path, OpenSslSigner, Signer, SigningKeys};
pub use staging::{Staging, STAGING_PREFIX};
pub use store::CertStore;
