//! Bundle codec: the external encode/decode collaborator.
//!
//! The combined signed-container format (PKCS#7) is never produced
//! in-process. The pipeline only depends on this contract:
//!
//! - `encode` takes an ordered list of PEM certificate files and writes one
//!   combined bundle, preserving order
//! - `decode` inverts a combined bundle back into individual DER certificates

use async_trait::async_trait;
use rootca_core::{split_pem_certificates, Result, RootcaError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::openssl::OpenSsl;

/// Encoder/decoder for the combined bundle format.
#[async_trait]
pub trait BundleCodec: Send + Sync {
    /// Encode the certificates at `cert_paths`, in order, into `output`.
    async fn encode(&self, cert_paths: &[PathBuf], output: &Path) -> Result<()>;

    /// Decode every certificate in `bundle`, returning DER bytes.
    async fn decode(&self, bundle: &Path) -> Result<Vec<Vec<u8>>>;
}

/// [`BundleCodec`] that shells out to `openssl crl2pkcs7` / `openssl pkcs7`.
#[derive(Debug, Clone, Default)]
pub struct OpenSslCodec {
    openssl: OpenSsl,
}

impl OpenSslCodec {
    /// Create a codec using the given openssl handle.
    #[must_use]
    pub const fn new(openssl: OpenSsl) -> Self {
        Self { openssl }
    }
}

#[async_trait]
impl BundleCodec for OpenSslCodec {
    async fn encode(&self, cert_paths: &[PathBuf], output: &Path) -> Result<()> {
        if cert_paths.is_empty() {
            return Err(RootcaError::Encoding(
                "no certificates to add to bundle".to_string(),
            ));
        }
        self.openssl
            .run(&encode_args(cert_paths, output))
            .await
            .map_err(RootcaError::Encoding)?;
        Ok(())
    }

    async fn decode(&self, bundle: &Path) -> Result<Vec<Vec<u8>>> {
        let stdout = self
            .openssl
            .run(&decode_args(bundle))
            .await
            .map_err(|e| RootcaError::Encoding(format!("extracting {}: {e}", bundle.display())))?;
        split_pem_certificates(&stdout)
    }
}

/// `crl2pkcs7 -nocrl -certfile <a> -certfile <b> ... -out <output>`
fn encode_args(cert_paths: &[PathBuf], output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["crl2pkcs7".into(), "-nocrl".into()];
    for path in cert_paths {
        args.push("-certfile".into());
        args.push(path.into());
    }
    args.push("-out".into());
    args.push(output.into());
    args
}

/// `pkcs7 -in <bundle> -print_certs`
fn decode_args(bundle: &Path) -> Vec<OsString> {
    vec![
        "pkcs7".into(),
        "-in".into(),
        bundle.into(),
        "-print_certs".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_args_preserve_order() {
        let paths = vec![PathBuf::from("/c/CC.crt"), PathBuf::from("/c/AA.crt")];
        let args = encode_args(&paths, Path::new("/out/x.p7b"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "crl2pkcs7",
                "-nocrl",
                "-certfile",
                "/c/CC.crt",
                "-certfile",
                "/c/AA.crt",
                "-out",
                "/out/x.p7b"
            ]
        );
    }

    #[test]
    fn test_decode_args() {
        let args = decode_args(Path::new("bundle.p7b"));
        assert_eq!(args.len(), 4);
        assert_eq!(args[2], OsString::from("bundle.p7b"));
        assert_eq!(args[3], OsString::from("-print_certs"));
    }

    #[tokio::test]
    async fn test_encode_refuses_empty_input() {
        let codec = OpenSslCodec::default();
        let err = codec.encode(&[], Path::new("out.p7b")).await.unwrap_err();
        assert!(matches!(err, RootcaError::Encoding(_)));
    }
}
