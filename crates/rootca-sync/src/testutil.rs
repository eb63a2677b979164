//! Shared fixtures for unit tests.

use async_trait::async_trait;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyIdMethod, KeyPair};
use rootca_core::{encode_pem, split_pem_certificates, Result, RootcaError};
use std::path::{Path, PathBuf};

use crate::codec::BundleCodec;

/// Self-signed CA certificate with a fresh key.
pub fn make_cert(name: &str) -> Vec<u8> {
    build_cert(name, None)
}

/// Self-signed CA certificate whose subject key identifier is `[ski; 20]`.
///
/// Two calls with the same `ski` give distinct DER (fresh key and serial)
/// that cross-reference as the same CA.
pub fn make_cert_with_ski(name: &str, ski: u8) -> Vec<u8> {
    build_cert(name, Some(vec![ski; 20]))
}

fn build_cert(name: &str, ski: Option<Vec<u8>>) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2040, 1, 1);
    if let Some(ski) = ski {
        params.key_identifier_method = KeyIdMethod::PreSpecified(ski);
    }
    params.self_signed(&key).unwrap().der().to_vec()
}

/// Codec whose "combined" format is a PEM concatenation, in input order.
#[derive(Debug, Default)]
pub struct PemCodec;

#[async_trait]
impl BundleCodec for PemCodec {
    async fn encode(&self, cert_paths: &[PathBuf], output: &Path) -> Result<()> {
        let mut out = String::new();
        for path in cert_paths {
            let data = std::fs::read(path).map_err(|e| RootcaError::io(path, e))?;
            for der in split_pem_certificates(&data)? {
                out.push_str(&encode_pem(&der));
            }
        }
        std::fs::write(output, out).map_err(|e| RootcaError::io(output, e))
    }

    async fn decode(&self, bundle: &Path) -> Result<Vec<Vec<u8>>> {
        let data = std::fs::read(bundle).map_err(|e| RootcaError::io(bundle, e))?;
        split_pem_certificates(&data)
    }
}

/// Codec that always fails.
#[derive(Debug, Default)]
pub struct BrokenCodec;

#[async_trait]
impl BundleCodec for BrokenCodec {
    async fn encode(&self, _cert_paths: &[PathBuf], _output: &Path) -> Result<()> {
        Err(RootcaError::Encoding("codec unavailable".to_string()))
    }

    async fn decode(&self, _bundle: &Path) -> Result<Vec<Vec<u8>>> {
        Err(RootcaError::Encoding("codec unavailable".to_string()))
    }
}
