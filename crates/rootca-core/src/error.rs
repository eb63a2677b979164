use std::path::Path;
use thiserror::Error;

/// Result type alias for rootca operations
pub type Result<T> = std::result::Result<T, RootcaError>;

/// Errors that can occur while synchronizing and building trust bundles
#[derive(Error, Debug)]
pub enum RootcaError {
    /// HTTP request failed before a response was received
    #[error("fetch of {url} failed: {reason}")]
    Fetch {
        /// Requested URL
        url: String,
        /// Transport error description
        reason: String,
    },

    /// Server answered with a non-success status
    #[error("fetch of {url} failed with HTTP status {status}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// A certificate's actual fingerprint does not match its expected identity
    #[error("certificate verification failed: expected {expected}, got {actual}")]
    Verification {
        /// Fingerprint the certificate was requested under
        expected: String,
        /// Fingerprint computed from the received bytes
        actual: String,
    },

    /// Upstream data is not attributable to an allow-listed identity
    #[error("{vendor}: provenance check failed, unexpected upstream identity {identity}")]
    Provenance {
        /// Vendor whose feed failed the check
        vendor: String,
        /// The identity that was observed
        identity: String,
    },

    /// The assembler was handed zero certificates
    #[error("refusing to build empty bundle {bundle}")]
    EmptyBundle {
        /// Bundle name
        bundle: String,
    },

    /// External bundle tool failed
    #[error("bundle encoding failed: {0}")]
    Encoding(String),

    /// Metadata write or rename failed
    #[error("failed to persist {path}: {source}")]
    Persistence {
        /// Path being written
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Vendor feed could not be understood
    #[error("{vendor}: malformed feed: {reason}")]
    Feed {
        /// Vendor whose feed is malformed
        vendor: String,
        /// What was wrong
        reason: String,
    },

    /// Certificate bytes could not be decoded
    #[error("certificate parse error: {0}")]
    CertParse(String),

    /// Detached signature creation or verification failed
    #[error("signing failed: {0}")]
    Signing(String),

    /// Filesystem error
    #[error("io error on {path}: {source}")]
    Io {
        /// Path involved
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run exceeded its deadline
    #[error("run deadline of {0} seconds exceeded")]
    Deadline(u64),

    /// A worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Task(String),
}

impl RootcaError {
    /// Build an [`RootcaError::Io`] for a path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Build an [`RootcaError::Persistence`] for a path.
    pub fn persistence(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Build a [`RootcaError::Feed`] error.
    pub fn feed(vendor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Feed {
            vendor: vendor.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from the network layer
    #[must_use]
    pub const fn is_fetch_error(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::HttpStatus { .. })
    }

    /// Returns true for the provenance safety cut-out, which is never retried
    #[must_use]
    pub const fn is_provenance_error(&self) -> bool {
        matches!(self, Self::Provenance { .. })
    }

    /// Returns the HTTP status code if the server rejected the request
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
