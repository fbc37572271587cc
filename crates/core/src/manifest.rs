use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{ExportArtifact, ExportFormat};
use crate::error::ValidationError;
use crate::types::{ArtifactId, OwnerId};

/// Name of the manifest file the producer writes into an artifact directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Producer-written description of an artifact's contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub format: ExportFormat,
    #[serde(default)]
    pub record_count: u64,
    #[serde(default)]
    pub media_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_range_end: Option<DateTime<Utc>>,
}

impl ArtifactManifest {
    pub fn from_json(raw: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(raw).map_err(|e| ValidationError::Manifest(e.to_string()))
    }

    /// Read `manifest.json` from `dir`. Returns `Ok(None)` when the producer
    /// did not write one.
    pub fn read_from(dir: &Path) -> Result<Option<Self>, ValidationError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_json(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ValidationError::Manifest(e.to_string())),
        }
    }

    /// Combine the manifest with the facts only the cataloguer knows.
    #[must_use]
    pub fn into_artifact(
        self,
        id: ArtifactId,
        owner_id: OwnerId,
        created_at: DateTime<Utc>,
        directory: &Path,
        size_bytes: u64,
    ) -> ExportArtifact {
        ExportArtifact {
            id,
            owner_id,
            format: self.format,
            created_at: self.created_at.unwrap_or(created_at),
            directory_path: directory.to_string_lossy().into_owned(),
            record_count: self.record_count,
            media_count: self.media_count,
            size_bytes,
            date_range_start: self.date_range_start,
            date_range_end: self.date_range_end,
            manifest_path: Some(
                directory
                    .join(MANIFEST_FILE_NAME)
                    .to_string_lossy()
                    .into_owned(),
            ),
        }
    }
}
