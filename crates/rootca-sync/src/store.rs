//! Content-addressed certificate cache.
//!
//! Entries live at `<dir>/<FINGERPRINT>.crt` as PEM. The file name is the
//! entry's identity: an entry is only trusted if the certificate inside it
//! hashes to the name on the file.

use rootca_core::{
    decode_certificate, encode_pem, CertificateRecord, Fingerprint, Result, RootcaError,
    ThumbprintSet,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of cached certificate files.
const ENTRY_SUFFIX: &str = ".crt";

/// A directory of verified certificates keyed by SHA-256 fingerprint.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

/// What was found on disk for a fingerprint.
enum EntryState {
    Valid,
    Invalid(String),
    Missing,
}

impl CertStore {
    /// Open (creating if needed) the store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RootcaError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `fingerprint`, whether or not it exists.
    #[must_use]
    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}{ENTRY_SUFFIX}"))
    }

    /// Make sure a verified entry for `fingerprint` exists.
    ///
    /// A valid entry is reused without calling `fetch`. A missing entry is
    /// fetched once. A corrupt or mismatched entry is discarded and fetched
    /// once; if the fresh bytes don't match either, the call fails and
    /// nothing is left on disk for that fingerprint.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Verification` if the fetched certificate does
    /// not hash to `fingerprint`, or whatever error `fetch` returns.
    pub async fn ensure<F, Fut>(&self, fingerprint: &Fingerprint, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<u8>>> + Send,
    {
        let path = self.path_for(fingerprint);

        match check_entry(&path, fingerprint).await {
            EntryState::Valid => {
                debug!(fingerprint = %fingerprint.short(), "cache hit");
                return Ok(path);
            }
            EntryState::Invalid(reason) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    reason = %reason,
                    "discarding invalid cache entry"
                );
                remove_if_exists(&path).await?;
            }
            EntryState::Missing => {}
        }

        let bytes = fetch().await?;
        let der = verify_bytes(&bytes, fingerprint)?;
        self.write_entry(fingerprint, &der).await?;
        info!(fingerprint = %fingerprint.short(), "cached certificate");
        Ok(path)
    }

    /// Remove every entry whose fingerprint is not in `wanted`.
    ///
    /// Stray files (leftover temp files, unparseable names) are removed too.
    /// Returns the number of files deleted.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the directory cannot be listed or a file
    /// cannot be removed.
    pub async fn reconcile(&self, wanted: &ThumbprintSet) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| RootcaError::io(&self.dir, e))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RootcaError::io(&self.dir, e))?
        {
            let path = entry.path();
            let name = entry.file_name();
            let keep = name
                .to_str()
                .and_then(|n| n.strip_suffix(ENTRY_SUFFIX))
                .and_then(|stem| Fingerprint::parse(stem).ok())
                .is_some_and(|fp| wanted.contains(&fp));

            if !keep {
                debug!(path = %path.display(), "removing unused cache file");
                remove_if_exists(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!(dir = %self.dir.display(), removed, "pruned certificate cache");
        }
        Ok(removed)
    }

    /// Populate the store from already-trusted DER certificates.
    ///
    /// Used to warm an empty store from a previously published bundle.
    /// Unparseable certificates are skipped. Returns the number added.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if an entry cannot be written.
    pub async fn seed(&self, certificates: Vec<Vec<u8>>) -> Result<usize> {
        let mut added = 0;
        for der in certificates {
            if let Err(e) = CertificateRecord::from_der(&der) {
                warn!(error = %e, "skipping unparseable certificate while seeding cache");
                continue;
            }
            let fingerprint = Fingerprint::of_der(&der);
            if tokio::fs::try_exists(self.path_for(&fingerprint))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            self.write_entry(&fingerprint, &der).await?;
            added += 1;
        }
        debug!(dir = %self.dir.display(), added, "seeded certificate cache");
        Ok(added)
    }

    /// Decode the cached entry for `fingerprint`.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the entry is missing, or
    /// `RootcaError::CertParse` if it cannot be decoded.
    pub async fn record(&self, fingerprint: &Fingerprint) -> Result<CertificateRecord> {
        let path = self.path_for(fingerprint);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| RootcaError::io(&path, e))?;
        CertificateRecord::from_bytes(&data)
    }

    /// Whether the store holds no certificate entries.
    ///
    /// # Errors
    ///
    /// Returns `RootcaError::Io` if the directory cannot be listed.
    pub async fn is_empty(&self) -> Result<bool> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| RootcaError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RootcaError::io(&self.dir, e))?
        {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.ends_with(ENTRY_SUFFIX))
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Write an entry via temp file and rename so readers never see a
    /// partial certificate.
    async fn write_entry(&self, fingerprint: &Fingerprint, der: &[u8]) -> Result<()> {
        let path = self.path_for(fingerprint);
        let tmp = self.dir.join(format!(".{fingerprint}{ENTRY_SUFFIX}.tmp"));

        tokio::fs::write(&tmp, encode_pem(der))
            .await
            .map_err(|e| RootcaError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(RootcaError::io(&path, e));
        }
        Ok(())
    }
}

async fn check_entry(path: &Path, fingerprint: &Fingerprint) -> EntryState {
    match tokio::fs::read(path).await {
        Ok(data) => match verify_bytes(&data, fingerprint) {
            Ok(_) => EntryState::Valid,
            Err(e) => EntryState::Invalid(e.to_string()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => EntryState::Missing,
        Err(e) => EntryState::Invalid(e.to_string()),
    }
}

/// Decode `bytes` as a certificate and check it hashes to `expected`.
fn verify_bytes(bytes: &[u8], expected: &Fingerprint) -> Result<Vec<u8>> {
    let der = decode_certificate(bytes).map_err(|e| RootcaError::Verification {
        expected: expected.to_string(),
        actual: format!("undecodable ({e})"),
    })?;
    CertificateRecord::from_der(&der).map_err(|e| RootcaError::Verification {
        expected: expected.to_string(),
        actual: format!("not a certificate ({e})"),
    })?;

    let actual = Fingerprint::of_der(&der);
    if actual != *expected {
        return Err(RootcaError::Verification {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(der)
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RootcaError::io(path, e)),
    }
}
