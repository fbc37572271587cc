//! Orchestration of artifact delivery and removal.
//!
//! A download runs in two phases. [`LifecycleCoordinator::prepare`] does
//! everything that can fail before a single byte is sent (lookup, ownership,
//! admission, confinement, existence) so callers can still answer with a
//! precise status code. [`LifecycleCoordinator::deliver`] then streams the
//! archive and, only after the sink reports a complete delivery, removes the
//! artifact when asked to.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use strongbox_archive::{ArchiveSink, StreamError, measure_directory, stream_directory};
use strongbox_catalog::{ArtifactCatalog, CatalogError, Page};
use strongbox_core::types::ARTIFACT_TIMESTAMP_FORMAT;
use strongbox_core::{
    ArtifactId, ArtifactManifest, ArtifactRoot, ExportArtifact, ExportFormat, OwnerId,
    ValidationError,
};

use crate::gate::{DownloadGate, DownloadPermit, GateFull};
use crate::guard::{AccessDenied, AccessGuard};

/// Page size used when walking a whole owner's rows internally.
const SCAN_PAGE_SIZE: u32 = 200;

/// Every way a lifecycle operation can fail.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// No catalog row with this ID.
    #[error("artifact not found: {0}")]
    NotFound(ArtifactId),

    /// The row exists but its directory is gone.
    #[error("artifact files not found: {0}")]
    FilesMissing(ArtifactId),

    #[error(transparent)]
    Forbidden(#[from] AccessDenied),

    #[error(transparent)]
    RateLimited(#[from] GateFull),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A catalogued row no longer passes validation, e.g. its stored path
    /// was altered after it was registered.
    #[error("stored artifact {artifact_id} failed validation: {source}")]
    Integrity {
        artifact_id: ArtifactId,
        #[source]
        source: ValidationError,
    },

    /// The archive could not be produced or delivered in full.
    #[error("stream of artifact {artifact_id} failed: {source}")]
    Stream {
        artifact_id: ArtifactId,
        #[source]
        source: StreamError,
    },

    #[error("catalog error: {0}")]
    Catalog(CatalogError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<CatalogError> for LifecycleError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => Self::NotFound(ArtifactId::new(id)),
            CatalogError::Validation(e) => Self::Validation(e),
            other => Self::Catalog(other),
        }
    }
}

impl LifecycleError {
    /// Validation failures on data read back from the catalog are integrity
    /// failures, not bad requests.
    fn for_stored_row(self, id: &ArtifactId) -> Self {
        match self {
            Self::Validation(source) => Self::Integrity {
                artifact_id: id.clone(),
                source,
            },
            other => other,
        }
    }
}

/// A download that passed every pre-stream check and holds its gate slot.
#[derive(Debug)]
pub struct PreparedDownload {
    artifact: ExportArtifact,
    directory: PathBuf,
    permit: DownloadPermit,
}

impl PreparedDownload {
    pub fn artifact(&self) -> &ExportArtifact {
        &self.artifact
    }
}

/// What a completed delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub artifact_id: ArtifactId,
    pub files: u64,
    pub bytes_written: u64,
    /// Whether the artifact was removed after delivery.
    pub deleted: bool,
}

/// Single entry point for listing, delivering, deleting and cataloguing
/// export artifacts.
pub struct LifecycleCoordinator {
    catalog: Arc<dyn ArtifactCatalog>,
    guard: AccessGuard,
    gate: DownloadGate,
}

impl LifecycleCoordinator {
    pub fn new(catalog: Arc<dyn ArtifactCatalog>, root: ArtifactRoot, gate: DownloadGate) -> Self {
        Self {
            catalog,
            guard: AccessGuard::new(root),
            gate,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn ArtifactCatalog> {
        &self.catalog
    }

    pub fn gate(&self) -> &DownloadGate {
        &self.gate
    }

    pub fn root(&self) -> &ArtifactRoot {
        self.guard.root()
    }

    /// The requester's own artifacts, newest first.
    pub async fn list(
        &self,
        requester: &OwnerId,
        page: Page,
    ) -> Result<Vec<ExportArtifact>, LifecycleError> {
        Ok(self.catalog.list_by_owner(requester, page).await?)
    }

    /// Run every check that precedes streaming and claim a gate slot.
    ///
    /// The slot is released when the returned value (or the delivery it is
    /// handed to) is dropped.
    pub async fn prepare(
        &self,
        id: &ArtifactId,
        requester: &OwnerId,
    ) -> Result<PreparedDownload, LifecycleError> {
        let artifact = self.load(id).await?;
        self.guard.check_ownership(&artifact, requester)?;
        let permit = self.gate.admit(requester).inspect_err(|e| {
            info!(owner = %requester, limit = e.limit, "download rejected at concurrency limit");
        })?;
        let directory = self
            .guard
            .artifact_directory(&artifact)
            .map_err(|e| LifecycleError::from(e).for_stored_row(&artifact.id))?;
        ensure_plain_directory(&artifact.id, &directory)
            .await
            .map_err(|e| e.for_stored_row(&artifact.id))?;

        Ok(PreparedDownload {
            artifact,
            directory,
            permit,
        })
    }

    /// Stream a prepared artifact into `sink`, then remove it if
    /// `delete_after` is set.
    ///
    /// Removal runs only when the stream returned success, which for a
    /// network sink means the consumer received every byte. Any failure
    /// leaves the row and directory untouched.
    pub async fn deliver<S>(
        &self,
        prepared: PreparedDownload,
        mut sink: S,
        delete_after: bool,
    ) -> Result<DeliveryReport, LifecycleError>
    where
        S: ArchiveSink + 'static,
    {
        let PreparedDownload {
            artifact,
            directory,
            permit: _permit,
        } = prepared;

        let streamed = tokio::task::spawn_blocking(move || stream_directory(&directory, &mut sink))
            .await
            .map_err(|e| LifecycleError::Task(e.to_string()))?;

        let summary = match streamed {
            Ok(summary) => summary,
            Err(source) => {
                if source.is_disconnect() {
                    info!(
                        artifact_id = %artifact.id,
                        owner = %artifact.owner_id,
                        "client disconnected mid-stream, artifact preserved"
                    );
                } else {
                    warn!(
                        artifact_id = %artifact.id,
                        owner = %artifact.owner_id,
                        error = %source,
                        "artifact stream failed, artifact preserved"
                    );
                }
                return Err(LifecycleError::Stream {
                    artifact_id: artifact.id,
                    source,
                });
            }
        };

        info!(
            artifact_id = %artifact.id,
            files = summary.files,
            bytes = summary.bytes_written,
            "artifact delivered"
        );

        let deleted = delete_after && self.remove_delivered(&artifact).await;

        Ok(DeliveryReport {
            artifact_id: artifact.id,
            files: summary.files,
            bytes_written: summary.bytes_written,
            deleted,
        })
    }

    /// [`prepare`](Self::prepare) followed by [`deliver`](Self::deliver).
    pub async fn download<S>(
        &self,
        id: &ArtifactId,
        requester: &OwnerId,
        sink: S,
        delete_after: bool,
    ) -> Result<DeliveryReport, LifecycleError>
    where
        S: ArchiveSink + 'static,
    {
        let prepared = self.prepare(id, requester).await?;
        self.deliver(prepared, sink, delete_after).await
    }

    /// Owner-initiated removal of an artifact's files and row.
    ///
    /// A directory that is already gone is not an error. A directory that
    /// cannot be removed is, and the row is kept so the owner can retry.
    pub async fn delete(&self, id: &ArtifactId, requester: &OwnerId) -> Result<(), LifecycleError> {
        let artifact = self.load(id).await?;
        self.guard.check_ownership(&artifact, requester)?;
        let directory = self
            .guard
            .artifact_directory(&artifact)
            .map_err(|e| LifecycleError::from(e).for_stored_row(id))?;

        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(artifact_id = %id, "artifact directory already absent");
            }
            Err(e) => {
                warn!(artifact_id = %id, error = %e, "failed to remove artifact directory");
                return Err(e.into());
            }
        }

        self.catalog.delete(id).await?;
        info!(artifact_id = %id, owner = %requester, "artifact deleted");
        Ok(())
    }

    /// Drop catalog rows whose directory no longer exists.
    ///
    /// Scans one owner, or every owner when `owner` is `None`, and returns
    /// the IDs that were removed. Rows failing validation are reported and
    /// left alone.
    pub async fn reconcile(&self, owner: Option<&OwnerId>) -> Result<Vec<ArtifactId>, LifecycleError> {
        let owners = match owner {
            Some(owner) => vec![owner.clone()],
            None => self.catalog.owners().await?,
        };

        let mut removed = Vec::new();
        for owner in owners {
            for artifact in self.all_rows(&owner).await? {
                let Ok(directory) = self.guard.artifact_directory(&artifact) else {
                    continue;
                };
                match tokio::fs::symlink_metadata(&directory).await {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(artifact_id = %artifact.id, error = %e, "cannot stat artifact directory");
                        continue;
                    }
                }
                match self.catalog.delete(&artifact.id).await {
                    Ok(()) | Err(CatalogError::NotFound(_)) => {
                        info!(artifact_id = %artifact.id, "removed orphaned artifact row");
                        removed.push(artifact.id);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }

    /// Catalogue a finished artifact directory for `owner`.
    ///
    /// `directory` must be `{root}/{owner}/{timestamp}`, with the timestamp
    /// in [`ARTIFACT_TIMESTAMP_FORMAT`]. Format, counts and date range come
    /// from its `manifest.json` when present; otherwise `format` must be
    /// given. The size is measured from disk.
    pub async fn register(
        &self,
        owner: &OwnerId,
        directory: &Path,
        format: Option<ExportFormat>,
    ) -> Result<ExportArtifact, LifecycleError> {
        let raw = directory
            .to_str()
            .ok_or_else(|| ValidationError::InvalidId(directory.to_string_lossy().into_owned()))?;
        let confined = self.guard.validate_path_confinement(raw)?;
        let id = self
            .root()
            .relative(&confined)
            .and_then(Path::to_str)
            .map(|rel| ArtifactId::new(rel.replace('\\', "/")))
            .ok_or_else(|| ValidationError::InvalidId(raw.to_owned()))?;
        let (id_owner, stamp) = id.segments()?;
        if id_owner != owner.as_str() {
            return Err(ValidationError::OwnerMismatch {
                id: id.to_string(),
                owner: owner.to_string(),
            }
            .into());
        }
        let stamp_time = NaiveDateTime::parse_from_str(stamp, ARTIFACT_TIMESTAMP_FORMAT)
            .map_err(|_| ValidationError::InvalidTimestamp(stamp.to_owned()))?
            .and_utc();

        ensure_plain_directory(&id, &confined).await?;

        let manifest = {
            let dir = confined.clone();
            tokio::task::spawn_blocking(move || ArtifactManifest::read_from(&dir))
                .await
                .map_err(|e| LifecycleError::Task(e.to_string()))??
        };
        let stats = {
            let dir = confined.clone();
            tokio::task::spawn_blocking(move || measure_directory(&dir))
                .await
                .map_err(|e| LifecycleError::Task(e.to_string()))??
        };

        let artifact = match manifest {
            Some(manifest) => manifest.into_artifact(id, owner.clone(), stamp_time, &confined, stats.bytes),
            None => ExportArtifact {
                id,
                owner_id: owner.clone(),
                format: format.ok_or_else(|| {
                    ValidationError::Manifest(
                        "no manifest.json found and no format given".to_owned(),
                    )
                })?,
                created_at: stamp_time,
                directory_path: confined.to_string_lossy().into_owned(),
                record_count: 0,
                media_count: 0,
                size_bytes: stats.bytes,
                date_range_start: None,
                date_range_end: None,
                manifest_path: None,
            },
        };
        self.catalog.create(&artifact).await?;
        info!(
            artifact_id = %artifact.id,
            owner = %owner,
            size_bytes = artifact.size_bytes,
            files = stats.files,
            "artifact registered"
        );
        Ok(artifact)
    }

    /// Catalogue every `{root}/{owner}/{timestamp}` directory that has no
    /// row yet and return the new IDs.
    ///
    /// Rebuilds a catalog that does not outlive the process. `default_format`
    /// applies to directories without a manifest; directories that still
    /// cannot be registered are logged and skipped.
    pub async fn rescan(
        &self,
        default_format: Option<ExportFormat>,
    ) -> Result<Vec<ArtifactId>, LifecycleError> {
        let candidates = {
            let root = self.root().path().to_path_buf();
            tokio::task::spawn_blocking(move || artifact_directories(&root))
                .await
                .map_err(|e| LifecycleError::Task(e.to_string()))??
        };

        let mut registered = Vec::new();
        for (owner, directory) in candidates {
            match self.register(&owner, &directory, default_format).await {
                Ok(artifact) => registered.push(artifact.id),
                Err(LifecycleError::Catalog(CatalogError::Duplicate(_))) => {}
                Err(e) => warn!(
                    owner = %owner,
                    directory = %directory.display(),
                    error = %e,
                    "skipping artifact directory that cannot be registered"
                ),
            }
        }
        info!(registered = registered.len(), "artifact root rescanned");
        Ok(registered)
    }

    async fn load(&self, id: &ArtifactId) -> Result<ExportArtifact, LifecycleError> {
        self.catalog.get_by_id(id).await.map_err(|e| {
            if matches!(e, CatalogError::NotFound(_)) {
                debug!(artifact_id = %id, "artifact row not found");
            }
            LifecycleError::from(e).for_stored_row(id)
        })
    }

    async fn all_rows(&self, owner: &OwnerId) -> Result<Vec<ExportArtifact>, LifecycleError> {
        let mut rows = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = self
                .catalog
                .list_by_owner(owner, Page::new(SCAN_PAGE_SIZE, offset))
                .await?;
            let fetched = page.len();
            rows.extend(page);
            if fetched < SCAN_PAGE_SIZE as usize {
                return Ok(rows);
            }
            offset += SCAN_PAGE_SIZE;
        }
    }

    /// Post-delivery cleanup. Returns whether the row is gone.
    async fn remove_delivered(&self, artifact: &ExportArtifact) -> bool {
        match self.guard.artifact_directory(artifact) {
            Ok(directory) => match tokio::fs::remove_dir_all(&directory).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    artifact_id = %artifact.id,
                    error = %e,
                    "failed to remove delivered artifact directory"
                ),
            },
            Err(_) => return false,
        }

        match self.catalog.delete(&artifact.id).await {
            Ok(()) => {
                info!(artifact_id = %artifact.id, "artifact deleted after delivery");
                true
            }
            Err(CatalogError::NotFound(_)) => {
                debug!(artifact_id = %artifact.id, "artifact row already deleted");
                true
            }
            Err(e) => {
                warn!(
                    artifact_id = %artifact.id,
                    error = %e,
                    "failed to delete artifact row after delivery, row is orphaned"
                );
                false
            }
        }
    }
}

/// `(owner, directory)` for every plain directory two levels below `root`.
fn artifact_directories(root: &Path) -> io::Result<Vec<(OwnerId, PathBuf)>> {
    let mut found = Vec::new();
    for owner_entry in std::fs::read_dir(root)? {
        let owner_entry = owner_entry?;
        if !owner_entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(owner) = owner_entry.file_name().into_string() else {
            warn!(path = %owner_entry.path().display(), "skipping non UTF-8 owner directory");
            continue;
        };
        for entry in std::fs::read_dir(owner_entry.path())? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                found.push((OwnerId::new(owner.clone()), entry.path()));
            }
        }
    }
    found.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(found)
}

/// The artifact directory must exist and be a real directory, not a link.
async fn ensure_plain_directory(id: &ArtifactId, directory: &Path) -> Result<(), LifecycleError> {
    match tokio::fs::symlink_metadata(directory).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            warn!(
                target: "security",
                artifact_id = %id,
                "artifact location is not a plain directory"
            );
            Err(ValidationError::NotADirectory(id.to_string()).into())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(artifact_id = %id, "artifact row present but its files are missing");
            Err(LifecycleError::FilesMissing(id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}
