use std::sync::Arc;

use strongbox_catalog::ArtifactCatalog;
use strongbox_catalog_memory::MemoryArtifactCatalog;
#[cfg(feature = "postgres")]
use strongbox_catalog_postgres::{PostgresArtifactCatalog, PostgresCatalogConfig};
use strongbox_core::ArtifactRoot;
use tracing::info;

use crate::config::{CatalogBackend, CatalogConfig};
use crate::error::ServerError;

/// Create the artifact catalog selected by configuration.
#[allow(clippy::unused_async)]
pub async fn create_catalog(
    config: &CatalogConfig,
    root: &ArtifactRoot,
) -> Result<Arc<dyn ArtifactCatalog>, ServerError> {
    let catalog: Arc<dyn ArtifactCatalog> = match config.backend {
        CatalogBackend::Memory => Arc::new(MemoryArtifactCatalog::new(root.clone())),
        #[cfg(feature = "postgres")]
        CatalogBackend::Postgres => {
            let url = config.url.clone().ok_or_else(|| {
                ServerError::Config("catalog postgres backend requires [catalog] url".into())
            })?;

            let pg_config = PostgresCatalogConfig {
                url,
                pool_size: config.pool_size,
                schema: config.schema.clone(),
                table_prefix: config.table_prefix.clone(),
                ssl_mode: config.ssl_mode.clone(),
                ssl_root_cert: config.ssl_root_cert.clone(),
            };

            let catalog = PostgresArtifactCatalog::new(pg_config, root.clone())
                .await
                .map_err(|e| ServerError::Config(format!("catalog postgres: {e}")))?;

            Arc::new(catalog)
        }
        #[cfg(not(feature = "postgres"))]
        CatalogBackend::Postgres => {
            return Err(ServerError::Config(
                "catalog backend \"postgres\" requires the `postgres` feature".into(),
            ));
        }
    };

    info!(backend = ?config.backend, "artifact catalog initialized");
    Ok(catalog)
}
