//! Detached signatures over published artifacts.

use async_trait::async_trait;
use base64::Engine;
use rootca_core::{Result, RootcaError};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::openssl::OpenSsl;

/// Produces `<artifact>.sig` next to an artifact.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `path`, returning the signature path.
    ///
    /// An existing signature that still verifies is kept as-is.
    async fn sign(&self, path: &Path) -> Result<PathBuf>;
}

/// Signature file for an artifact.
#[must_use]
pub fn signature_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

/// PEM-encoded signing key pair.
#[derive(Clone)]
pub struct SigningKeys {
    public_pem: Vec<u8>,
    private_pem: Vec<u8>,
}

impl std::fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeys").finish_non_exhaustive()
    }
}

impl SigningKeys {
    /// Keys already in PEM form.
    #[must_use]
    pub const fn from_pem(public_pem: Vec<u8>, private_pem: Vec<u8>) -> Self {
        Self {
            public_pem,
            private_pem,
        }
    }

    /// Read PEM keys from disk.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if either file cannot be read.
    pub fn from_files(public: &Path, private: &Path) -> Result<Self> {
        let public_pem = std::fs::read(public).map_err(|e| RootcaError::io(public, e))?;
        let private_pem = std::fs::read(private).map_err(|e| RootcaError::io(private, e))?;
        Ok(Self::from_pem(public_pem, private_pem))
    }

    /// Keys given as base64 DER, the form they take in CI secrets.
    ///
    /// The public key is wrapped as `PUBLIC KEY`, the private key as
    /// `EC PRIVATE KEY`.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Signing` if either value is not valid base64.
    pub fn from_base64(public: &str, private: &str) -> Result<Self> {
        let engine = base64::engine::general_purpose::STANDARD;
        let decode = |what: &str, value: &str| {
            engine
                .decode(value.trim())
                .map_err(|e| RootcaError::Signing(format!("invalid base64 {what}: {e}")))
        };
        let public_der = decode("public key", public)?;
        let private_der = decode("private key", private)?;

        let public_pem = pem::encode(&pem::Pem::new("PUBLIC KEY", public_der));
        let private_pem = pem::encode(&pem::Pem::new("EC PRIVATE KEY", private_der));
        Ok(Self::from_pem(public_pem.into_bytes(), private_pem.into_bytes()))
    }
}

/// [`Signer`] backed by `openssl dgst -sha256`.
#[derive(Debug, Clone)]
pub struct OpenSslSigner {
    openssl: OpenSsl,
    keys: SigningKeys,
}

impl OpenSslSigner {
    /// Create a signer for the given key pair.
    #[must_use]
    pub const fn new(openssl: OpenSsl, keys: SigningKeys) -> Self {
        Self { openssl, keys }
    }

    async fn verify(&self, path: &Path, sig: &Path, public_key: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "dgst".into(),
            "-sha256".into(),
            "-verify".into(),
            public_key.into(),
            "-signature".into(),
            sig.into(),
            path.into(),
        ];
        self.openssl
            .run(&args)
            .await
            .map(|_| ())
            .map_err(RootcaError::Signing)
    }
}

#[async_trait]
impl Signer for OpenSslSigner {
    async fn sign(&self, path: &Path) -> Result<PathBuf> {
        let sig = signature_path(path);
        let public_key = write_key(&self.keys.public_pem)?;
        let private_key = write_key(&self.keys.private_pem)?;

        if sig.exists() {
            if self.verify(path, &sig, public_key.path()).await.is_ok() {
                debug!(path = %path.display(), "existing signature verified");
                return Ok(sig);
            }
            warn!(path = %path.display(), "existing signature does not verify, re-signing");
            tokio::fs::remove_file(&sig)
                .await
                .map_err(|e| RootcaError::io(&sig, e))?;
        }

        let args: Vec<OsString> = vec![
            "dgst".into(),
            "-sha256".into(),
            "-sign".into(),
            private_key.path().into(),
            "-out".into(),
            sig.clone().into(),
            path.into(),
        ];
        self.openssl
            .run(&args)
            .await
            .map_err(RootcaError::Signing)?;

        if let Err(e) = self.verify(path, &sig, public_key.path()).await {
            let _ = tokio::fs::remove_file(&sig).await;
            return Err(e);
        }

        info!(path = %path.display(), "signed artifact");
        Ok(sig)
    }
}

/// Key material goes to a private temp file that is removed on drop.
fn write_key(pem: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new().map_err(|e| RootcaError::io("<tempfile>", e))?;
    file.write_all(pem)
        .and_then(|()| file.flush())
        .map_err(|e| RootcaError::io(file.path(), e))?;
    Ok(file)
}
