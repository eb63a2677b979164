//! End-to-end runs of the pipeline against in-memory vendor feeds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyIdMethod, KeyPair};
use rootca_core::{
    encode_pem, split_pem_certificates, CertificateRecord, CertificateRef, Fingerprint,
    Resolution, Result, RootcaError, ThumbprintSet, VendorSource,
};
use rootca_sync::{
    artifact_paths, BundleCodec, Determination, IntersectionSpec, MetadataStore, Orchestrator,
    RebuildReason, Signer, SyncOptions, CACHE_DIR, FORCE_UPDATE_MARKER, METADATA_FILE_NAME,
    STAGING_PREFIX,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn make_cert(name: &str, ski: Option<u8>) -> Vec<u8> {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.not_before = rcgen::date_time_ymd(2020, 1, 1);
    params.not_after = rcgen::date_time_ymd(2040, 1, 1);
    if let Some(ski) = ski {
        params.key_identifier_method = KeyIdMethod::PreSpecified(vec![ski; 20]);
    }
    params.self_signed(&key).unwrap().der().to_vec()
}

/// Codec whose combined format is a PEM concatenation.
struct PemCodec;

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

enum Behavior {
    Normal,
    FailFetch,
    Provenance,
    RejectAll,
    Hang,
    FailAfter(Duration),
}

/// Vendor feed serving a fixed certificate list.
struct FakeSource {
    name: String,
    certs: Vec<Vec<u8>>,
    inline: bool,
    unpublished: bool,
    upstream: Option<(String, DateTime<Utc>)>,
    behavior: Behavior,
    fetched: Mutex<Vec<Fingerprint>>,
}

impl FakeSource {
    fn new(name: &str, certs: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            certs,
            inline: false,
            unpublished: false,
            upstream: None,
            behavior: Behavior::Normal,
            fetched: Mutex::new(Vec::new()),
        }
    }

    fn inline(mut self) -> Self {
        self.inline = true;
        self
    }

    /// Remote references whose fingerprint is only known after download.
    fn unpublished(mut self) -> Self {
        self.unpublished = true;
        self
    }

    /// Fixed change key and upstream date instead of the derived key.
    fn upstream(mut self, key: &str, date: DateTime<Utc>) -> Self {
        self.upstream = Some((key.to_string(), date));
        self
    }

    fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn fetched(&self) -> Vec<Fingerprint> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl VendorSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self) -> Result<Resolution> {
        match self.behavior {
            Behavior::Provenance => {
                return Err(RootcaError::Provenance {
                    vendor: self.name.clone(),
                    identity: "mallory@example.com".to_string(),
                })
            }
            Behavior::Hang => tokio::time::sleep(Duration::from_secs(60)).await,
            Behavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                return Err(RootcaError::feed(&self.name, "feed went away"));
            }
            _ => {}
        }

        let set: ThumbprintSet = self.certs.iter().map(|d| Fingerprint::of_der(d)).collect();
        let wanted = self
            .certs
            .iter()
            .map(|der| {
                if self.inline {
                    CertificateRef::Inline { der: der.clone() }
                } else if self.unpublished {
                    CertificateRef::Remote {
                        locator: Fingerprint::of_der(der).to_string(),
                        fingerprint: None,
                        label: "unpublished".to_string(),
                    }
                } else {
                    let fp = Fingerprint::of_der(der);
                    CertificateRef::remote(fp.to_string(), fp)
                }
            })
            .collect();

        let (change_key, source_date) = match &self.upstream {
            Some((key, date)) => (key.clone(), Some(*date)),
            None => (set.change_key(), None),
        };
        Ok(Resolution {
            change_key,
            source_date,
            wanted,
        })
    }

    async fn fetch(&self, reference: &CertificateRef) -> Result<Vec<u8>> {
        let CertificateRef::Remote { locator, .. } = reference else {
            panic!("inline references are never fetched");
        };
        if matches!(self.behavior, Behavior::FailFetch) {
            return Err(RootcaError::HttpStatus {
                url: locator.clone(),
                status: 503,
            });
        }
        let der = self
            .certs
            .iter()
            .find(|d| Fingerprint::of_der(d).as_str() == locator)
            .cloned()
            .unwrap();
        self.fetched.lock().unwrap().push(Fingerprint::of_der(&der));
        Ok(der)
    }

    fn admit(&self, _record: &CertificateRecord) -> bool {
        !matches!(self.behavior, Behavior::RejectAll)
    }
}

/// Records what it was asked to sign and writes a marker signature.
#[derive(Default)]
struct RecordingSigner {
    signed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn sign(&self, path: &Path) -> Result<PathBuf> {
        self.signed.lock().unwrap().push(path.to_path_buf());
        let sig = rootca_sync::signature_path(path);
        std::fs::write(&sig, b"signed").map_err(|e| RootcaError::io(&sig, e))?;
        Ok(sig)
    }
}

fn orchestrator(workdir: &Path) -> Orchestrator {
    Orchestrator::new(SyncOptions::new(workdir), Arc::new(PemCodec))
}

fn staging_dirs(workdir: &Path) -> usize {
    std::fs::read_dir(workdir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(STAGING_PREFIX)
        })
        .count()
}

fn read_artifacts(workdir: &Path, bundle: &str) -> (Vec<u8>, Vec<u8>) {
    let (p7b, pem) = artifact_paths(workdir, bundle);
    (std::fs::read(p7b).unwrap(), std::fs::read(pem).unwrap())
}

fn bundle_order(workdir: &Path, bundle: &str) -> Vec<Fingerprint> {
    let (_, pem) = artifact_paths(workdir, bundle);
    split_pem_certificates(&std::fs::read(pem).unwrap())
        .unwrap()
        .iter()
        .map(|d| Fingerprint::of_der(d))
        .collect()
}

#[tokio::test]
async fn test_cache_reuse_discard_and_fetch() {
    let tmp = TempDir::new().unwrap();
    let aa = make_cert("AA", None);
    let bb = make_cert("BB", None);
    let cc = make_cert("CC", None);
    let (fp_aa, fp_bb, fp_cc) = (
        Fingerprint::of_der(&aa),
        Fingerprint::of_der(&bb),
        Fingerprint::of_der(&cc),
    );

    // AA cached and valid, BB cached under the wrong content, CC absent.
    let cache = tmp.path().join(CACHE_DIR).join("fake");
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join(format!("{fp_aa}.crt")), encode_pem(&aa)).unwrap();
    std::fs::write(
        cache.join(format!("{fp_bb}.crt")),
        encode_pem(&make_cert("Impostor", None)),
    )
    .unwrap();

    let source = Arc::new(FakeSource::new("fake", vec![aa, bb, cc]));
    let summary = orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();

    let mut fetched = source.fetched();
    fetched.sort();
    let mut expected_fetches = vec![fp_bb.clone(), fp_cc.clone()];
    expected_fetches.sort();
    assert_eq!(fetched, expected_fetches, "AA must be served from cache");

    let expected: ThumbprintSet = [fp_aa, fp_bb, fp_cc].into_iter().collect();
    let descending: Vec<Fingerprint> = expected.descending().cloned().collect();
    assert_eq!(bundle_order(tmp.path(), "fake_ca_bundle"), descending);

    let metadata = summary.metadata.get("fake").unwrap();
    assert_eq!(metadata.num_certs, 3);
    assert_eq!(metadata.key, expected.change_key());
    assert!(metadata.bundles.contains_key("fake_ca_bundle.p7b"));
    assert!(metadata.bundles.contains_key("fake_ca_bundle.pem"));

    let stored = MetadataStore::new(tmp.path()).load().await.unwrap().unwrap();
    assert_eq!(stored, summary.metadata);
}

#[tokio::test]
async fn test_up_to_date_skips_fetch_and_missing_pem_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let certs = vec![make_cert("One", None), make_cert("Two", None)];
    let source = Arc::new(FakeSource::new("fake", certs));

    let first = orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(
        first.outcomes[0].determination,
        Determination::Rebuild(RebuildReason::FirstBuild)
    );
    assert_eq!(source.fetched().len(), 2);

    let second = orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(second.outcomes[0].determination, Determination::UpToDate);
    assert_eq!(source.fetched().len(), 2, "up-to-date vendor must not fetch");
    assert_eq!(second.metadata, first.metadata);

    let (_, pem) = artifact_paths(tmp.path(), "fake_ca_bundle");
    std::fs::remove_file(&pem).unwrap();

    let third = orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(
        third.outcomes[0].determination,
        Determination::Rebuild(RebuildReason::MissingArtifact)
    );
    assert!(pem.exists());
    assert_eq!(third.metadata.get("fake").unwrap().num_certs, 2);
}

#[tokio::test]
async fn test_force_marker_rebuilds() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new("fake", vec![make_cert("Forced", None)]));
    orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();

    std::fs::write(tmp.path().join(FORCE_UPDATE_MARKER), b"").unwrap();
    let summary = orchestrator(tmp.path())
        .with_source(source)
        .run()
        .await
        .unwrap();
    assert_eq!(
        summary.outcomes[0].determination,
        Determination::Rebuild(RebuildReason::Forced)
    );
    assert!(!tmp.path().join(FORCE_UPDATE_MARKER).exists());
}

#[tokio::test]
async fn test_failed_vendor_commits_nothing() {
    let tmp = TempDir::new().unwrap();
    let good = Arc::new(FakeSource::new("good", vec![make_cert("Good", None)]));
    orchestrator(tmp.path())
        .with_source(good.clone())
        .run()
        .await
        .unwrap();
    let before = MetadataStore::new(tmp.path()).load().await.unwrap();

    let broken = Arc::new(
        FakeSource::new("broken", vec![make_cert("Broken", None)]).behaving(Behavior::FailFetch),
    );
    let err = orchestrator(tmp.path())
        .with_source(good)
        .with_source(broken)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(503));

    assert_eq!(MetadataStore::new(tmp.path()).load().await.unwrap(), before);
    let (p7b, pem) = artifact_paths(tmp.path(), "broken_ca_bundle");
    assert!(!p7b.exists());
    assert!(!pem.exists());
}

#[tokio::test]
async fn test_provenance_failure_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::new("google", vec![make_cert("Chrome Root", None)])
            .behaving(Behavior::Provenance),
    );
    let err = orchestrator(tmp.path())
        .with_source(source)
        .run()
        .await
        .unwrap_err();
    assert!(err.is_provenance_error());
    assert!(MetadataStore::new(tmp.path()).load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_everything_filtered_is_empty_bundle() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::new("fake", vec![make_cert("Expiring", None)]).behaving(Behavior::RejectAll),
    );
    let err = orchestrator(tmp.path())
        .with_source(source)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RootcaError::EmptyBundle { .. }));
}

#[tokio::test]
async fn test_run_deadline() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::new("slow", vec![]).behaving(Behavior::Hang));
    let mut options = SyncOptions::new(tmp.path());
    options.run_deadline = Some(Duration::from_millis(50));

    let err = Orchestrator::new(options, Arc::new(PemCodec))
        .with_source(source)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RootcaError::Deadline(_)));
}

#[tokio::test]
async fn test_intersection_matches_by_key_identifier() {
    let tmp = TempDir::new().unwrap();

    // A is re-encoded (same key identifier, different bytes) for two vendors.
    let a_apple = make_cert("A", Some(0xA1));
    let a_reencoded = make_cert("A", Some(0xA1));
    let b = make_cert("B", Some(0xB2));
    let apple_only = make_cert("Apple Only", Some(0x01));
    let mozilla_only = make_cert("Mozilla Only", Some(0x02));
    let missing_from_google = make_cert("Not Google", Some(0x03));

    let vendors = vec![
        FakeSource::new(
            "apple",
            vec![a_apple.clone(), b.clone(), apple_only, missing_from_google.clone()],
        ),
        FakeSource::new("google", vec![a_reencoded.clone(), b.clone()]),
        FakeSource::new(
            "microsoft",
            vec![a_reencoded, b.clone(), missing_from_google.clone()],
        ),
        FakeSource::new(
            "mozilla",
            vec![a_apple.clone(), b.clone(), mozilla_only, missing_from_google],
        ),
    ];

    let signer = Arc::new(RecordingSigner::default());
    let mut pipeline = orchestrator(tmp.path())
        .with_intersection(IntersectionSpec::default())
        .with_signer(Some(signer.clone()));
    for vendor in vendors {
        pipeline = pipeline.with_source(Arc::new(vendor.inline()));
    }

    let summary = pipeline.run().await.unwrap();

    let expected: ThumbprintSet = [Fingerprint::of_der(&a_apple), Fingerprint::of_der(&b)]
        .into_iter()
        .collect();
    let descending: Vec<Fingerprint> = expected.descending().cloned().collect();
    assert_eq!(
        bundle_order(tmp.path(), "tlsinspector_ca_bundle"),
        descending
    );

    let intersection = summary.metadata.get("tls_inspector").unwrap();
    assert_eq!(intersection.num_certs, 2);
    assert_eq!(intersection.key, expected.change_key());
    assert_eq!(summary.outcomes.len(), 5);

    // Two artifacts for each of five bundles, plus the metadata file.
    let signed = signer.signed.lock().unwrap();
    assert_eq!(signed.len(), 11);
    assert_eq!(
        signed.last().unwrap().file_name().unwrap(),
        METADATA_FILE_NAME
    );

    // Signatures are published next to their artifacts.
    for name in [
        "tlsinspector_ca_bundle.p7b.sig",
        "tlsinspector_ca_bundle.pem.sig",
        "apple_ca_bundle.pem.sig",
        "bundle_metadata.json.sig",
    ] {
        assert!(tmp.path().join(name).exists(), "{name} not published");
    }
    assert_eq!(staging_dirs(tmp.path()), 0);
}

#[tokio::test]
async fn test_failed_run_leaves_published_bundles_untouched() {
    let tmp = TempDir::new().unwrap();
    let first = make_cert("First", None);
    orchestrator(tmp.path())
        .with_source(Arc::new(FakeSource::new("good", vec![first.clone()])))
        .run()
        .await
        .unwrap();
    let published = read_artifacts(tmp.path(), "good_ca_bundle");
    let before = MetadataStore::new(tmp.path()).load().await.unwrap();

    // "good" changes upstream and rebuilds; "bad" fails after it finished.
    let good = Arc::new(FakeSource::new("good", vec![first, make_cert("Second", None)]));
    let bad = Arc::new(
        FakeSource::new("bad", vec![make_cert("Bad", None)])
            .behaving(Behavior::FailAfter(Duration::from_millis(300))),
    );
    let err = orchestrator(tmp.path())
        .with_source(good.clone())
        .with_source(bad)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RootcaError::Feed { .. }));
    assert_eq!(good.fetched().len(), 1, "good must have rebuilt before the failure");

    assert_eq!(read_artifacts(tmp.path(), "good_ca_bundle"), published);
    assert_eq!(MetadataStore::new(tmp.path()).load().await.unwrap(), before);
    assert_eq!(staging_dirs(tmp.path()), 0);
}

#[tokio::test]
async fn test_deadline_leaves_published_bundles_and_marker() {
    let tmp = TempDir::new().unwrap();
    let first = make_cert("First", None);
    orchestrator(tmp.path())
        .with_source(Arc::new(FakeSource::new("good", vec![first.clone()])))
        .run()
        .await
        .unwrap();
    let published = read_artifacts(tmp.path(), "good_ca_bundle");
    std::fs::write(tmp.path().join(FORCE_UPDATE_MARKER), b"").unwrap();

    let mut options = SyncOptions::new(tmp.path());
    options.run_deadline = Some(Duration::from_millis(500));
    let signer = Arc::new(RecordingSigner::default());
    let err = Orchestrator::new(options, Arc::new(PemCodec))
        .with_source(Arc::new(FakeSource::new(
            "good",
            vec![first, make_cert("Second", None)],
        )))
        .with_source(Arc::new(FakeSource::new("slow", vec![]).behaving(Behavior::Hang)))
        .with_signer(Some(signer.clone()))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, RootcaError::Deadline(_)));

    // The rebuilt bundle was signed in staging and never published.
    assert!(!signer.signed.lock().unwrap().is_empty());
    assert_eq!(read_artifacts(tmp.path(), "good_ca_bundle"), published);
    assert!(!tmp.path().join("good_ca_bundle.pem.sig").exists());
    assert!(tmp.path().join(FORCE_UPDATE_MARKER).exists());
    assert_eq!(staging_dirs(tmp.path()), 0);
}

#[tokio::test]
async fn test_stale_source_keeps_published_bundle() {
    let tmp = TempDir::new().unwrap();
    let june = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let january = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let kept = make_cert("Kept", None);

    let first = orchestrator(tmp.path())
        .with_source(Arc::new(
            FakeSource::new("fake", vec![kept.clone()]).upstream("k1", june),
        ))
        .run()
        .await
        .unwrap();
    let published = read_artifacts(tmp.path(), "fake_ca_bundle");

    // Upstream rolled back: new key, older date, one more certificate.
    let rolled_back = Arc::new(
        FakeSource::new("fake", vec![kept, make_cert("Added", None)]).upstream("k2", january),
    );
    let second = orchestrator(tmp.path())
        .with_source(rolled_back.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(second.outcomes[0].determination, Determination::StaleSource);
    assert!(rolled_back.fetched().is_empty());
    assert_eq!(second.metadata, first.metadata);
    assert_eq!(second.metadata.get("fake").unwrap().key, "k1");
    assert_eq!(second.metadata.get("fake").unwrap().date, june);
    assert_eq!(read_artifacts(tmp.path(), "fake_ca_bundle"), published);
    assert_eq!(
        MetadataStore::new(tmp.path()).load().await.unwrap(),
        Some(first.metadata)
    );
}

#[tokio::test]
async fn test_fingerprint_learned_from_download() {
    let tmp = TempDir::new().unwrap();
    let certs = vec![make_cert("Unlisted A", None), make_cert("Unlisted B", None)];
    let expected: ThumbprintSet = certs.iter().map(|d| Fingerprint::of_der(d)).collect();
    let source = Arc::new(FakeSource::new("fake", certs).unpublished());

    let summary = orchestrator(tmp.path())
        .with_source(source.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(source.fetched().len(), 2);
    let descending: Vec<Fingerprint> = expected.descending().cloned().collect();
    assert_eq!(bundle_order(tmp.path(), "fake_ca_bundle"), descending);
    assert_eq!(summary.metadata.get("fake").unwrap().num_certs, 2);

    let cache = tmp.path().join(CACHE_DIR).join("fake");
    for fingerprint in expected.descending() {
        assert!(cache.join(format!("{fingerprint}.crt")).exists());
    }
}
