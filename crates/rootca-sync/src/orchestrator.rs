//! Run orchestration.
//!
//! A run has two phases. While preparing, one worker per vendor runs
//! concurrently and writes rebuilt artifacts and their signatures into the
//! run's [`Staging`] area; once every worker has joined, the intersection
//! bundle is derived and the metadata record is staged and signed. Any
//! error, including the run deadline, aborts the workers and discards the
//! staging area, so published files are never touched. Only then does the
//! commit phase promote the staged files into the workdir, with the
//! metadata record last.

use chrono::{DateTime, Utc};
use rootca_core::{
    decode_certificate, BundleMetadata, CertificateRef, Fingerprint, Resolution, Result,
    RootcaError, ThumbprintSet, VendorMetadata, VendorSource,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::assembler::{artifact_paths, artifacts_present, BundleAssembler};
use crate::codec::BundleCodec;
use crate::intersection::IntersectionBuilder;
use crate::metadata::{MetadataStore, METADATA_FILE_NAME};
use crate::signer::Signer;
use crate::staging::Staging;
use crate::store::CertStore;

/// Marker file whose presence forces a full rebuild.
pub const FORCE_UPDATE_MARKER: &str = ".force_update";

/// Directory under the workdir holding the per-vendor certificate caches.
pub const CACHE_DIR: &str = ".cache";

/// Options for one run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory holding artifacts, metadata and caches
    pub workdir: PathBuf,
    /// Rebuild every bundle regardless of change keys
    pub force: bool,
    /// Abort the whole run after this long
    pub run_deadline: Option<Duration>,
}

impl SyncOptions {
    /// Options for `workdir` with no force flag and no deadline.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            force: false,
            run_deadline: None,
        }
    }
}

/// The derived bundle of certificates every listed vendor trusts.
#[derive(Debug, Clone)]
pub struct IntersectionSpec {
    /// Metadata key
    pub name: String,
    /// Artifact base name
    pub bundle_name: String,
    /// Vendors to intersect; the first supplies the representative files
    pub vendors: Vec<String>,
}

impl Default for IntersectionSpec {
    fn default() -> Self {
        Self {
            name: "tls_inspector".to_string(),
            bundle_name: "tlsinspector_ca_bundle".to_string(),
            vendors: ["apple", "google", "microsoft", "mozilla"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Why a bundle is being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    /// No previous build recorded
    FirstBuild,
    /// Forced by flag or marker file
    Forced,
    /// One of the artifacts is missing on disk
    MissingArtifact,
    /// Upstream change key differs
    KeyChanged,
}

/// Outcome of comparing a fresh resolution against the previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determination {
    /// Same change key and both artifacts present
    UpToDate,
    /// Upstream claims an older date than the recorded build; keep what we have
    StaleSource,
    /// Build the bundle
    Rebuild(RebuildReason),
}

impl fmt::Display for Determination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up-to-date"),
            Self::StaleSource => write!(f, "stale-source"),
            Self::Rebuild(RebuildReason::FirstBuild) => write!(f, "rebuild (first build)"),
            Self::Rebuild(RebuildReason::Forced) => write!(f, "rebuild (forced)"),
            Self::Rebuild(RebuildReason::MissingArtifact) => write!(f, "rebuild (missing artifact)"),
            Self::Rebuild(RebuildReason::KeyChanged) => write!(f, "rebuild (key changed)"),
        }
    }
}

/// Decide what to do with a bundle.
#[must_use]
pub fn determine(
    previous: Option<&VendorMetadata>,
    change_key: &str,
    source_date: Option<DateTime<Utc>>,
    artifacts_present: bool,
    force: bool,
) -> Determination {
    let Some(previous) = previous else {
        return Determination::Rebuild(RebuildReason::FirstBuild);
    };
    if force {
        return Determination::Rebuild(RebuildReason::Forced);
    }
    if !artifacts_present {
        return Determination::Rebuild(RebuildReason::MissingArtifact);
    }
    if previous.key == change_key {
        return Determination::UpToDate;
    }
    if source_date.is_some_and(|date| date < previous.date) {
        return Determination::StaleSource;
    }
    Determination::Rebuild(RebuildReason::KeyChanged)
}

/// What happened to one bundle during a run.
#[derive(Debug, Clone)]
pub struct BundleOutcome {
    /// Metadata key
    pub name: String,
    /// Artifact base name
    pub bundle: String,
    /// Decision taken
    pub determination: Determination,
    /// Record now in effect
    pub metadata: VendorMetadata,
}

impl BundleOutcome {
    /// Whether new artifacts were built for this bundle.
    #[must_use]
    pub const fn rebuilt(&self) -> bool {
        matches!(self.determination, Determination::Rebuild(_))
    }
}

/// Everything a run produced, still in staging.
struct Prepared {
    outcomes: Vec<BundleOutcome>,
    metadata: BundleMetadata,
    force_marker: bool,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Per bundle outcomes, vendors first then the intersection
    pub outcomes: Vec<BundleOutcome>,
    /// The committed metadata record
    pub metadata: BundleMetadata,
}

impl RunSummary {
    /// Number of bundles rebuilt this run.
    #[must_use]
    pub fn rebuilt(&self) -> usize {
        self.outcomes.iter().filter(|o| o.rebuilt()).count()
    }
}

/// Drives a full run over a set of vendor sources.
pub struct Orchestrator {
    options: SyncOptions,
    sources: Vec<Arc<dyn VendorSource>>,
    intersection: Option<IntersectionSpec>,
    codec: Arc<dyn BundleCodec>,
    signer: Option<Arc<dyn Signer>>,
}

impl Orchestrator {
    /// Create an orchestrator with no sources and no intersection.
    pub fn new(options: SyncOptions, codec: Arc<dyn BundleCodec>) -> Self {
        Self {
            options,
            sources: Vec::new(),
            intersection: None,
            codec,
            signer: None,
        }
    }

    /// Add a vendor.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn VendorSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Build an intersection bundle after the vendors.
    #[must_use]
    pub fn with_intersection(mut self, spec: IntersectionSpec) -> Self {
        self.intersection = Some(spec);
        self
    }

    /// Sign artifacts and metadata. `None` skips signing.
    #[must_use]
    pub fn with_signer(mut self, signer: Option<Arc<dyn Signer>>) -> Self {
        self.signer = signer;
        self
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any step, or `RootcaError::Deadline`
    /// if the run deadline passes. Previously published artifacts and
    /// metadata are left as they were.
    pub async fn run(&self) -> Result<RunSummary> {
        let workdir = &self.options.workdir;
        tokio::fs::create_dir_all(workdir)
            .await
            .map_err(|e| RootcaError::io(workdir, e))?;

        let staging = Staging::create(workdir).await?;
        let prepared = match self.options.run_deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.prepare(&staging))
                .await
                .map_err(|_| RootcaError::Deadline(deadline.as_secs()))??,
            None => self.prepare(&staging).await?,
        };

        // Not subject to the deadline: a commit is never cut short.
        self.commit(&staging, prepared).await
    }

    async fn prepare(&self, staging: &Staging) -> Result<Prepared> {
        let workdir = &self.options.workdir;
        let force_marker = force_marker_present(workdir).await?;
        let force = self.options.force || force_marker;
        if force {
            info!("forcing rebuild of all bundles");
        }

        let previous = MetadataStore::new(workdir).load().await?.unwrap_or_default();

        let mut outcomes = self.run_vendors(&previous, force, staging.path()).await?;

        if let Some(spec) = &self.intersection {
            let outcome = self
                .run_intersection(spec, &previous, force, &outcomes, staging.path())
                .await?;
            outcomes.push(outcome);
        }

        let mut metadata = BundleMetadata::new();
        for outcome in &outcomes {
            metadata.insert(outcome.name.clone(), outcome.metadata.clone());
        }
        let staged = MetadataStore::new(staging.path());
        staged.save(&metadata).await?;
        if let Some(signer) = &self.signer {
            signer.sign(staged.path()).await?;
        }

        Ok(Prepared {
            outcomes,
            metadata,
            force_marker,
        })
    }

    /// Publish everything staged, metadata record last.
    async fn commit(&self, staging: &Staging, prepared: Prepared) -> Result<RunSummary> {
        let Prepared {
            outcomes,
            metadata,
            force_marker,
        } = prepared;

        for outcome in outcomes.iter().filter(|o| o.rebuilt()) {
            staging.promote_bundle(&outcome.bundle).await?;
            info!(bundle = %outcome.bundle, "published");
        }
        staging.promote(METADATA_FILE_NAME).await?;

        if force_marker {
            clear_force_marker(&self.options.workdir).await;
        }

        info!(bundles = outcomes.len(), rebuilt = outcomes.iter().filter(|o| o.rebuilt()).count(), "run complete");
        Ok(RunSummary { outcomes, metadata })
    }

    /// Fan out one worker per vendor and collect their outcomes.
    async fn run_vendors(
        &self,
        previous: &BundleMetadata,
        force: bool,
        staging: &Path,
    ) -> Result<Vec<BundleOutcome>> {
        let mut workers = JoinSet::new();
        for source in &self.sources {
            let worker = VendorWorker {
                source: Arc::clone(source),
                previous: previous.get(source.name()).cloned(),
                workdir: self.options.workdir.clone(),
                staging: staging.to_path_buf(),
                codec: Arc::clone(&self.codec),
                signer: self.signer.clone(),
                force,
            };
            workers.spawn(worker.run());
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(error = %e, "vendor failed, aborting run");
                    workers.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    workers.abort_all();
                    return Err(RootcaError::Task(e.to_string()));
                }
            };
            outcomes.insert(outcome.name.clone(), outcome);
        }
        Ok(outcomes.into_values().collect())
    }

    async fn run_intersection(
        &self,
        spec: &IntersectionSpec,
        previous: &BundleMetadata,
        force: bool,
        vendors: &[BundleOutcome],
        staging: &Path,
    ) -> Result<BundleOutcome> {
        let workdir = &self.options.workdir;
        let inputs = spec
            .vendors
            .iter()
            .map(|vendor| {
                let outcome = vendors.iter().find(|o| &o.name == vendor).ok_or_else(|| {
                    RootcaError::feed(&spec.name, format!("unknown vendor {vendor}"))
                })?;
                // This run's output where it rebuilt, the published bundle otherwise.
                let dir = if outcome.rebuilt() { staging } else { workdir.as_path() };
                let (p7b, _) = artifact_paths(dir, &outcome.bundle);
                Ok((vendor.clone(), p7b))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(bundle = %spec.name, phase = "fetching", "computing intersection");
        let intersection = IntersectionBuilder::new(Arc::clone(&self.codec))
            .compute(&inputs)
            .await?;
        let key = intersection.change_key();

        let prior = previous.get(&spec.name);
        let present = artifacts_present(workdir, &spec.bundle_name).await;
        let determination = determine(prior, &key, None, present, force);
        log_determination(&spec.name, prior, &key, determination);

        let metadata = match (determination, prior) {
            (Determination::UpToDate | Determination::StaleSource, Some(prior)) => prior.clone(),
            _ => BundleAssembler::new(Arc::clone(&self.codec), staging)
                .build(&intersection.cert_paths(), &spec.bundle_name)
                .await?
                .into_metadata(key, Utc::now()),
        };

        let signed_in = if matches!(determination, Determination::Rebuild(_)) {
            staging
        } else {
            workdir.as_path()
        };
        sign_artifacts(self.signer.as_deref(), signed_in, &spec.bundle_name).await?;
        info!(bundle = %spec.name, phase = "complete", certificates = metadata.num_certs, "bundle ready");

        Ok(BundleOutcome {
            name: spec.name.clone(),
            bundle: spec.bundle_name.clone(),
            determination,
            metadata,
        })
    }
}

/// Everything one vendor worker owns.
struct VendorWorker {
    source: Arc<dyn VendorSource>,
    previous: Option<VendorMetadata>,
    workdir: PathBuf,
    staging: PathBuf,
    codec: Arc<dyn BundleCodec>,
    signer: Option<Arc<dyn Signer>>,
    force: bool,
}

impl VendorWorker {
    async fn run(self) -> Result<BundleOutcome> {
        let name = self.source.name().to_string();
        let bundle = self.source.bundle_name();

        info!(vendor = %name, phase = "fetching", "resolving upstream feed");
        let resolution = self.source.resolve().await?;

        let present = artifacts_present(&self.workdir, &bundle).await;
        let determination = determine(
            self.previous.as_ref(),
            &resolution.change_key,
            resolution.source_date,
            present,
            self.force,
        );
        log_determination(&name, self.previous.as_ref(), &resolution.change_key, determination);

        let (metadata, artifacts_dir) = match (determination, &self.previous) {
            (Determination::UpToDate | Determination::StaleSource, Some(previous)) => {
                (previous.clone(), &self.workdir)
            }
            _ => {
                info!(vendor = %name, phase = "building", wanted = resolution.wanted.len(), "building bundle");
                (self.build(&bundle, resolution).await?, &self.staging)
            }
        };

        info!(vendor = %name, phase = "signing", "signing artifacts");
        sign_artifacts(self.signer.as_deref(), artifacts_dir, &bundle).await?;

        info!(vendor = %name, phase = "complete", certificates = metadata.num_certs, "bundle ready");
        Ok(BundleOutcome {
            name,
            bundle,
            determination,
            metadata,
        })
    }

    /// Build the bundle into the staging area.
    async fn build(&self, bundle: &str, resolution: Resolution) -> Result<VendorMetadata> {
        let name = self.source.name();
        let store = CertStore::open(self.workdir.join(CACHE_DIR).join(name)).await?;
        if store.is_empty().await? {
            self.seed_from_published(&store, bundle).await;
        }

        let mut wanted = ThumbprintSet::new();
        let mut paths = Vec::new();
        for reference in &resolution.wanted {
            let (fingerprint, path) = self.ensure(&store, reference).await?;
            if wanted.contains(&fingerprint) {
                continue;
            }

            let record = store.record(&fingerprint).await?;
            if !self.source.admit(&record) {
                info!(vendor = %name, fingerprint = %fingerprint.short(), subject = %record.subject, "certificate excluded by vendor filter");
                continue;
            }
            wanted.insert(fingerprint);
            paths.push(path);
        }

        store.reconcile(&wanted).await?;
        let built = BundleAssembler::new(Arc::clone(&self.codec), &self.staging)
            .build(&paths, bundle)
            .await?;
        self.source.finish().await?;

        let date = resolution.source_date.unwrap_or_else(Utc::now);
        Ok(built.into_metadata(resolution.change_key, date))
    }

    /// Resolve one reference to a verified cache entry.
    async fn ensure(
        &self,
        store: &CertStore,
        reference: &CertificateRef,
    ) -> Result<(Fingerprint, PathBuf)> {
        if let Some(fingerprint) = reference.expected_fingerprint() {
            let path = store
                .ensure(&fingerprint, || async move {
                    match reference {
                        CertificateRef::Inline { der } => Ok(der.clone()),
                        CertificateRef::Remote { .. } => self.source.fetch(reference).await,
                    }
                })
                .await?;
            return Ok((fingerprint, path));
        }

        // Identity is only known once the bytes are in hand.
        let der = decode_certificate(&self.source.fetch(reference).await?)?;
        let fingerprint = Fingerprint::of_der(&der);
        debug!(vendor = %self.source.name(), fingerprint = %fingerprint.short(), "downloaded certificate with unpublished fingerprint");
        let path = store
            .ensure(&fingerprint, || std::future::ready(Ok(der)))
            .await?;
        Ok((fingerprint, path))
    }

    /// Warm an empty cache from the last published bundle, if there is one.
    async fn seed_from_published(&self, store: &CertStore, bundle: &str) {
        let (p7b, _) = artifact_paths(&self.workdir, bundle);
        if !tokio::fs::try_exists(&p7b).await.unwrap_or(false) {
            return;
        }
        match self.codec.decode(&p7b).await {
            Ok(certificates) => {
                if let Err(e) = store.seed(certificates).await {
                    warn!(vendor = %self.source.name(), error = %e, "failed to seed certificate cache");
                }
            }
            Err(e) => {
                warn!(vendor = %self.source.name(), error = %e, "failed to extract published bundle");
            }
        }
    }
}

fn log_determination(
    name: &str,
    previous: Option<&VendorMetadata>,
    new_key: &str,
    determination: Determination,
) {
    let old_key = previous.map_or("", |p| p.key.as_str());
    match determination {
        Determination::UpToDate => {
            info!(vendor = %name, old_key = %old_key, new_key = %new_key, "bundle is up-to-date");
        }
        Determination::StaleSource => {
            warn!(
                vendor = %name,
                old_key = %old_key,
                new_key = %new_key,
                "upstream data is older than the published bundle, keeping existing bundle"
            );
        }
        Determination::Rebuild(_) => {
            info!(vendor = %name, old_key = %old_key, new_key = %new_key, decision = %determination, "bundle needs rebuilding");
        }
    }
}

async fn sign_artifacts(signer: Option<&dyn Signer>, dir: &Path, bundle: &str) -> Result<()> {
    let Some(signer) = signer else {
        debug!(bundle = %bundle, "no signing keys configured, skipping signatures");
        return Ok(());
    };
    let (p7b, pem) = artifact_paths(dir, bundle);
    signer.sign(&p7b).await?;
    signer.sign(&pem).await?;
    Ok(())
}

async fn force_marker_present(workdir: &Path) -> Result<bool> {
    let marker = workdir.join(FORCE_UPDATE_MARKER);
    let present = tokio::fs::try_exists(&marker)
        .await
        .map_err(|e| RootcaError::io(&marker, e))?;
    if present {
        info!(marker = %marker.display(), "found force update marker");
    }
    Ok(present)
}

/// Remove the force marker once a forced run has committed.
async fn clear_force_marker(workdir: &Path) {
    let marker = workdir.join(FORCE_UPDATE_MARKER);
    match tokio::fs::remove_file(&marker).await {
        Ok(()) => debug!(marker = %marker.display(), "cleared force update marker"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(marker = %marker.display(), error = %e, "failed to clear force update marker"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn previous(key: &str) -> VendorMetadata {
        VendorMetadata {
            date: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            key: key.to_string(),
            bundles: BTreeMap::new(),
            num_certs: 1,
        }
    }

    #[test]
    fn test_same_key_with_artifacts_is_up_to_date() {
        let prev = previous("k1");
        assert_eq!(
            determine(Some(&prev), "k1", None, true, false),
            Determination::UpToDate
        );
    }

    #[test]
    fn test_same_key_missing_artifact_rebuilds() {
        let prev = previous("k1");
        assert_eq!(
            determine(Some(&prev), "k1", None, false, false),
            Determination::Rebuild(RebuildReason::MissingArtifact)
        );
    }

    #[test]
    fn test_first_build_and_force() {
        assert_eq!(
            determine(None, "k1", None, true, false),
            Determination::Rebuild(RebuildReason::FirstBuild)
        );
        let prev = previous("k1");
        assert_eq!(
            determine(Some(&prev), "k1", None, true, true),
            Determination::Rebuild(RebuildReason::Forced)
        );
    }

    #[test]
    fn test_older_source_date_is_stale() {
        let prev = previous("k1");
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        assert_eq!(
            determine(Some(&prev), "k2", Some(older), true, false),
            Determination::StaleSource
        );
        assert_eq!(
            determine(Some(&prev), "k2", Some(newer), true, false),
            Determination::Rebuild(RebuildReason::KeyChanged)
        );
        assert_eq!(
            determine(Some(&prev), "k2", None, true, false),
            Determination::Rebuild(RebuildReason::KeyChanged)
        );
    }

    #[test]
    fn test_stale_source_never_blocks_missing_artifacts() {
        let prev = previous("k1");
        let older = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            determine(Some(&prev), "k2", Some(older), false, false),
            Determination::Rebuild(RebuildReason::MissingArtifact)
        );
    }

    #[tokio::test]
    async fn test_force_marker_detect_and_clear() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!force_marker_present(tmp.path()).await.unwrap());
        std::fs::write(tmp.path().join(FORCE_UPDATE_MARKER), b"").unwrap();
        assert!(force_marker_present(tmp.path()).await.unwrap());
        assert!(tmp.path().join(FORCE_UPDATE_MARKER).exists());

        clear_force_marker(tmp.path()).await;
        assert!(!tmp.path().join(FORCE_UPDATE_MARKER).exists());
        clear_force_marker(tmp.path()).await;
    }

    #[test]
    fn test_default_intersection_order() {
        let spec = IntersectionSpec::default();
        assert_eq!(spec.vendors, ["apple", "google", "microsoft", "mozilla"]);
        assert_eq!(spec.bundle_name, "tlsinspector_ca_bundle");
    }
}
