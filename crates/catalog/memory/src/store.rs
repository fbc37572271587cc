use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;

use strongbox_catalog::{ArtifactCatalog, CatalogError, Page, newest_first, validate_for_create};
use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, OwnerId};

/// In-memory [`ArtifactCatalog`] backed by a [`DashMap`] keyed by artifact ID.
///
/// Rows do not survive a restart. Suitable for tests and single-process
/// deployments that rebuild the catalog with `register`.
#[derive(Debug)]
pub struct MemoryArtifactCatalog {
    root: ArtifactRoot,
    rows: DashMap<String, ExportArtifact>,
}

impl MemoryArtifactCatalog {
    /// Create an empty catalog validating paths against `root`.
    pub fn new(root: ArtifactRoot) -> Self {
        Self {
            root,
            rows: DashMap::new(),
        }
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl ArtifactCatalog for MemoryArtifactCatalog {
    async fn create(&self, artifact: &ExportArtifact) -> Result<(), CatalogError> {
        validate_for_create(artifact, &self.root)?;

        // `entry` holds the shard lock, so check-then-insert is atomic.
        match self.rows.entry(artifact.id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(CatalogError::Duplicate(artifact.id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(artifact.clone());
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: &ArtifactId) -> Result<ExportArtifact, CatalogError> {
        self.rows
            .get(id.as_str())
            .map(|row| row.value().clone())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: Page,
    ) -> Result<Vec<ExportArtifact>, CatalogError> {
        let mut owned: Vec<ExportArtifact> = self
            .rows
            .iter()
            .filter(|row| row.owner_id == *owner)
            .map(|row| row.value().clone())
            .collect();
        owned.sort_by(newest_first);

        Ok(owned
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn delete(&self, id: &ArtifactId) -> Result<(), CatalogError> {
        self.rows
            .remove(id.as_str())
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    async fn owners(&self) -> Result<Vec<OwnerId>, CatalogError> {
        let owners: BTreeSet<OwnerId> = self
            .rows
            .iter()
            .map(|row| row.owner_id.clone())
            .collect();
        Ok(owners.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use strongbox_catalog::testing::{run_catalog_conformance_tests, test_artifact};

    use super::*;

    fn catalog() -> MemoryArtifactCatalog {
        MemoryArtifactCatalog::new(ArtifactRoot::new("/srv/exports"))
    }

    #[tokio::test]
    async fn conformance() {
        let root = ArtifactRoot::new("/srv/exports");
        let catalog = MemoryArtifactCatalog::new(root.clone());
        run_catalog_conformance_tests(&catalog, &root)
            .await
            .expect("conformance suite should pass");
    }

    #[tokio::test]
    async fn concurrent_deletes_only_one_wins() {
        let catalog = Arc::new(catalog());
        let root = ArtifactRoot::new("/srv/exports");
        let artifact = test_artifact(&root, "u1", "20240101-000000", Utc::now());
        catalog.create(&artifact).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let catalog = Arc::clone(&catalog);
            let id = artifact.id.clone();
            handles.push(tokio::spawn(async move { catalog.delete(&id).await }));
        }

        let mut ok = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(CatalogError::NotFound(_)) => not_found += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(not_found, 7);
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn other_owner_never_listed() {
        let catalog = catalog();
        let root = ArtifactRoot::new("/srv/exports");
        for i in 0..4 {
            catalog
                .create(&test_artifact(&root, "u1", &format!("s{i}"), Utc::now()))
                .await
                .unwrap();
        }
        let listed = catalog
            .list_by_owner(&OwnerId::from("u2"), Page::new(100, 0))
            .await
            .unwrap();
        assert!(listed.is_empty());
    }
}
