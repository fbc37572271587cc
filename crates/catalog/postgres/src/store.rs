use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use strongbox_catalog::{ArtifactCatalog, CatalogError, Page, validate_for_create};
use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, ExportFormat, OwnerId};

use crate::config::PostgresCatalogConfig;
use crate::migrations;

const COLUMNS: &str = "id, owner_id, format, created_at, directory_path, record_count, \
                       media_count, size_bytes, date_range_start, date_range_end, manifest_path";

/// Build `PgConnectOptions` from a [`PostgresCatalogConfig`], applying SSL
/// settings when configured.
fn build_connect_options(
    config: &PostgresCatalogConfig,
) -> Result<sqlx::postgres::PgConnectOptions, CatalogError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| CatalogError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(CatalogError::Connection(format!(
                    "unknown ssl_mode: {other}"
                )));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    Ok(options)
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    owner_id: String,
    format: String,
    created_at: DateTime<Utc>,
    directory_path: String,
    record_count: i64,
    media_count: i64,
    size_bytes: i64,
    date_range_start: Option<DateTime<Utc>>,
    date_range_end: Option<DateTime<Utc>>,
    manifest_path: Option<String>,
}

impl TryFrom<ArtifactRow> for ExportArtifact {
    type Error = CatalogError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let count = |name: &str, v: i64| {
            u64::try_from(v).map_err(|_| {
                CatalogError::Serialization(format!("{name} is negative for {}", row.id))
            })
        };
        Ok(Self {
            format: row
                .format
                .parse::<ExportFormat>()
                .map_err(|e| CatalogError::Serialization(e.to_string()))?,
            record_count: count("record_count", row.record_count)?,
            media_count: count("media_count", row.media_count)?,
            size_bytes: count("size_bytes", row.size_bytes)?,
            id: ArtifactId::new(row.id),
            owner_id: OwnerId::new(row.owner_id),
            created_at: row.created_at,
            directory_path: row.directory_path,
            date_range_start: row.date_range_start,
            date_range_end: row.date_range_end,
            manifest_path: row.manifest_path,
        })
    }
}

fn to_bigint(name: &str, v: u64) -> Result<i64, CatalogError> {
    i64::try_from(v).map_err(|_| CatalogError::Serialization(format!("{name} out of range: {v}")))
}

/// PostgreSQL-backed implementation of [`ArtifactCatalog`].
///
/// Uniqueness of IDs is enforced by the primary key; `INSERT ... ON CONFLICT
/// DO NOTHING` reports collisions as [`CatalogError::Duplicate`] without a
/// separate existence check.
pub struct PostgresArtifactCatalog {
    pool: PgPool,
    config: Arc<PostgresCatalogConfig>,
    root: ArtifactRoot,
}

impl PostgresArtifactCatalog {
    /// Connect, create the pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Connection`] if pool creation fails, or
    /// [`CatalogError::Backend`] if migrations fail.
    pub async fn new(
        config: PostgresCatalogConfig,
        root: ArtifactRoot,
    ) -> Result<Self, CatalogError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| CatalogError::Connection(e.to_string()))?;

        Self::from_pool(pool, config, root).await
    }

    /// Build the catalog over an existing pool. Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Backend`] if migrations fail.
    pub async fn from_pool(
        pool: PgPool,
        config: PostgresCatalogConfig,
        root: ArtifactRoot,
    ) -> Result<Self, CatalogError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
            root,
        })
    }
}

#[async_trait]
impl ArtifactCatalog for PostgresArtifactCatalog {
    async fn create(&self, artifact: &ExportArtifact) -> Result<(), CatalogError> {
        validate_for_create(artifact, &self.root)?;
        let table = self.config.artifacts_table();

        let query = format!(
            "INSERT INTO {table} ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO NOTHING"
        );

        let result = sqlx::query(&query)
            .bind(artifact.id.as_str())
            .bind(artifact.owner_id.as_str())
            .bind(artifact.format.as_str())
            .bind(artifact.created_at)
            .bind(&artifact.directory_path)
            .bind(to_bigint("record_count", artifact.record_count)?)
            .bind(to_bigint("media_count", artifact.media_count)?)
            .bind(to_bigint("size_bytes", artifact.size_bytes)?)
            .bind(artifact.date_range_start)
            .bind(artifact.date_range_end)
            .bind(artifact.manifest_path.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::Duplicate(artifact.id.to_string()));
        }
        debug!(artifact_id = %artifact.id, "artifact row inserted");
        Ok(())
    }

    async fn get_by_id(&self, id: &ArtifactId) -> Result<ExportArtifact, CatalogError> {
        let table = self.config.artifacts_table();
        let query = format!("SELECT {COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<ArtifactRow> = sqlx::query_as(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        row.ok_or_else(|| CatalogError::NotFound(id.to_string()))?
            .try_into()
    }

    async fn list_by_owner(
        &self,
        owner: &OwnerId,
        page: Page,
    ) -> Result<Vec<ExportArtifact>, CatalogError> {
        let table = self.config.artifacts_table();
        let query = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );

        let rows: Vec<ArtifactRow> = sqlx::query_as(&query)
            .bind(owner.as_str())
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        rows.into_iter().map(ExportArtifact::try_from).collect()
    }

    async fn delete(&self, id: &ArtifactId) -> Result<(), CatalogError> {
        let table = self.config.artifacts_table();
        let query = format!("DELETE FROM {table} WHERE id = $1");

        let result = sqlx::query(&query)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn owners(&self) -> Result<Vec<OwnerId>, CatalogError> {
        let table = self.config.artifacts_table();
        let query = format!("SELECT DISTINCT owner_id FROM {table} ORDER BY owner_id");

        let rows: Vec<(String,)> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(|(o,)| OwnerId::new(o)).collect())
    }
}
