use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use strongbox_core::{ExportArtifact, ExportFormat};

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status indicator.
    #[schema(example = "ok")]
    pub status: String,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message.
    #[schema(example = "export not found")]
    pub error: String,
}

/// One export as shown to its owner. Filesystem locations are never exposed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportSummary {
    /// Artifact ID, `{owner}/{timestamp}`.
    #[schema(example = "alice/20240501-080000")]
    pub id: String,
    pub format: ExportFormat,
    pub created_at: DateTime<Utc>,
    #[schema(example = 1200)]
    pub record_count: u64,
    #[schema(example = 14)]
    pub media_count: u64,
    /// Uncompressed size on disk.
    #[schema(example = 5_242_880)]
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range_end: Option<DateTime<Utc>>,
    /// Name the archive is offered under.
    #[schema(example = "export-alice-20240501-080000.tar.gz")]
    pub file_name: String,
}

impl From<ExportArtifact> for ExportSummary {
    fn from(a: ExportArtifact) -> Self {
        Self {
            file_name: a.archive_file_name(),
            id: a.id.to_string(),
            format: a.format,
            created_at: a.created_at,
            record_count: a.record_count,
            media_count: a.media_count,
            size_bytes: a.size_bytes,
            date_range_start: a.date_range_start,
            date_range_end: a.date_range_end,
        }
    }
}

/// Response for listing the requester's exports.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListExportsResponse {
    /// Newest first.
    pub exports: Vec<ExportSummary>,
    /// Effective page size after clamping.
    pub limit: u32,
    pub offset: u32,
}
