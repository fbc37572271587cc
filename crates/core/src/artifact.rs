use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confinement::ArtifactRoot;
use crate::error::ValidationError;
use crate::types::{ArtifactId, OwnerId};

/// Serialization format of the records inside an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ValidationError::UnknownFormat(other.to_owned())),
        }
    }
}

/// One completed, downloadable export.
///
/// Artifacts are immutable once catalogued: there is no update path, only
/// create and delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// `{owner}/{timestamp}`; also the directory below the artifact root.
    pub id: ArtifactId,
    /// The only identity allowed to read or delete this artifact.
    pub owner_id: OwnerId,
    pub format: ExportFormat,
    /// Creation time, used for newest-first listing.
    pub created_at: DateTime<Utc>,
    /// Directory holding the artifact's files.
    pub directory_path: String,
    pub record_count: u64,
    pub media_count: u64,
    /// Total on-disk size, computed once when the artifact is catalogued.
    pub size_bytes: u64,
    #[serde(default)]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_range_end: Option<DateTime<Utc>>,
    /// Machine-readable manifest describing the artifact contents.
    #[serde(default)]
    pub manifest_path: Option<String>,
}

impl ExportArtifact {
    /// Check every invariant that can be verified without touching storage.
    ///
    /// The ID must be `{owner_id}/{timestamp}`, the directory must be exactly
    /// the ID's location below `root`, and the manifest (if any) must be
    /// confined under the artifact directory.
    pub fn validate(&self, root: &ArtifactRoot) -> Result<(), ValidationError> {
        let (owner, _) = self.id.segments()?;
        if owner != self.owner_id.as_str() {
            return Err(ValidationError::OwnerMismatch {
                id: self.id.to_string(),
                owner: self.owner_id.to_string(),
            });
        }

        let dir = root.confine(&self.directory_path)?;
        if dir != root.artifact_dir(&self.id)? {
            return Err(ValidationError::DirectoryMismatch(self.id.to_string()));
        }

        match (self.date_range_start, self.date_range_end) {
            (Some(start), Some(end)) if end < start => {
                return Err(ValidationError::DateRange {
                    start: start.to_rfc3339(),
                    end: end.to_rfc3339(),
                });
            }
            (Some(_), None) | (None, Some(_)) => return Err(ValidationError::HalfOpenDateRange),
            _ => {}
        }

        if let Some(manifest) = &self.manifest_path {
            let manifest = root.confine(manifest)?;
            if !manifest.starts_with(&dir) || manifest == dir {
                return Err(ValidationError::Manifest(
                    "manifest must live inside the artifact directory".to_owned(),
                ));
            }
        }

        Ok(())
    }

    /// File name offered to downloaders, e.g. `export-u1-20240101-000000.tar.gz`.
    #[must_use]
    pub fn archive_file_name(&self) -> String {
        let stem: String = self
            .id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("export-{stem}.tar.gz")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::TimeZone;

    use super::*;

    pub(crate) fn sample(root: &ArtifactRoot) -> ExportArtifact {
        let owner = OwnerId::from("u1");
        let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id = ArtifactId::for_owner(&owner, created_at);
        let dir = root.artifact_dir(&id).unwrap();
        ExportArtifact {
            manifest_path: Some(dir.join("manifest.json").to_string_lossy().into_owned()),
            directory_path: dir.to_string_lossy().into_owned(),
            id,
            owner_id: owner,
            format: ExportFormat::Json,
            created_at,
            record_count: 12,
            media_count: 3,
            size_bytes: 4096,
            date_range_start: None,
            date_range_end: None,
        }
    }

    #[test]
    fn format_parses_known_tags_only() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(ValidationError::UnknownFormat(_))
        ));
        assert_eq!(
            serde_json::to_string(&ExportFormat::Csv).unwrap(),
            "\"csv\""
        );
    }

    #[test]
    fn valid_artifact_passes() {
        let root = ArtifactRoot::new("/srv/exports");
        assert_eq!(sample(&root).validate(&root), Ok(()));
    }

    #[test]
    fn owner_must_match_id_prefix() {
        let root = ArtifactRoot::new("/srv/exports");
        let mut a = sample(&root);
        a.owner_id = OwnerId::from("u2");
        assert!(matches!(
            a.validate(&root),
            Err(ValidationError::OwnerMismatch { .. })
        ));
    }

    #[test]
    fn directory_must_be_confined_and_match_id() {
        let root = ArtifactRoot::new("/srv/exports");

        let mut a = sample(&root);
        a.directory_path = "/srv/exports/u1/../u2/20240101-120000".into();
        assert!(matches!(
            a.validate(&root),
            Err(ValidationError::Traversal(_))
        ));

        let mut a = sample(&root);
        a.directory_path = "/tmp/u1/20240101-120000".into();
        assert!(matches!(a.validate(&root), Err(ValidationError::Escape(_))));

        let mut a = sample(&root);
        a.directory_path = "/srv/exports/u1/other".into();
        assert!(matches!(
            a.validate(&root),
            Err(ValidationError::DirectoryMismatch(_))
        ));
    }

    #[test]
    fn date_range_rules() {
        let root = ArtifactRoot::new("/srv/exports");
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 7, 1, 0, 0, 0).unwrap();

        let mut a = sample(&root);
        a.date_range_start = Some(start);
        a.date_range_end = Some(end);
        assert_eq!(a.validate(&root), Ok(()));

        a.date_range_start = Some(end);
        a.date_range_end = Some(start);
        assert!(matches!(
            a.validate(&root),
            Err(ValidationError::DateRange { .. })
        ));

        a.date_range_end = None;
        assert_eq!(a.validate(&root), Err(ValidationError::HalfOpenDateRange));
    }

    #[test]
    fn manifest_must_stay_inside_artifact_dir() {
        let root = ArtifactRoot::new("/srv/exports");
        let mut a = sample(&root);
        a.manifest_path = Some("/srv/exports/u2/20240101-120000/manifest.json".into());
        assert!(matches!(
            a.validate(&root),
            Err(ValidationError::Manifest(_))
        ));
    }

    #[test]
    fn archive_file_name_is_header_safe() {
        let root = ArtifactRoot::new("/srv/exports");
        let a = sample(&root);
        assert_eq!(a.archive_file_name(), "export-u1-20240101-120000.tar.gz");
    }
}
