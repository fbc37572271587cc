use std::cmp::Ordering;

use async_trait::async_trait;

use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, OwnerId};

use crate::error::CatalogError;

/// Pagination window for [`ArtifactCatalog::list_by_owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    #[must_use]
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Durable store of export artifact rows.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Concurrency control is the backend's responsibility; callers never hold
/// locks across catalog calls.
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    /// Persist a new artifact row.
    ///
    /// Fails with [`CatalogError::Validation`] when any artifact invariant is
    /// violated (including path confinement) and with
    /// [`CatalogError::Duplicate`] when the ID is already present.
    async fn create(&self, artifact: &ExportArtifact) -> Result<(), CatalogError>;

    /// Fetch a single artifact, or [`CatalogError::NotFound`].
    async fn get_by_id(&self, id: &ArtifactId) -> Result<ExportArtifact, CatalogError>;

    /// Artifacts belonging to `owner` only, newest first.
    ///
    /// Rows sharing a `created_at` are ordered by ID descending.
    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: Page,
    ) -> Result<Vec<ExportArtifact>, CatalogError>;

    /// Remove a row. A second delete of the same ID fails with
    /// [`CatalogError::NotFound`].
    async fn delete(&self, id: &ArtifactId) -> Result<(), CatalogError>;

    /// Every owner with at least one catalogued artifact.
    async fn owners(&self) -> Result<Vec<OwnerId>, CatalogError>;
}

/// Shared pre-insert validation used by every backend.
pub fn validate_for_create(
    artifact: &ExportArtifact,
    root: &ArtifactRoot,
) -> Result<(), CatalogError> {
    artifact.validate(root).map_err(CatalogError::from)
}

/// Listing order: `created_at` descending, then ID descending.
pub fn newest_first(a: &ExportArtifact, b: &ExportArtifact) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_catalog(_: &dyn ArtifactCatalog) {}

    #[test]
    fn default_page() {
        assert_eq!(Page::default(), Page::new(50, 0));
    }
}
