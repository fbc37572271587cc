use sqlx::PgPool;

use crate::config::PostgresCatalogConfig;

/// Create the artifacts table and its listing index if they do not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(
    pool: &PgPool,
    config: &PostgresCatalogConfig,
) -> Result<(), sqlx::Error> {
    let table = config.artifacts_table();

    let create_artifacts = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            format TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            directory_path TEXT NOT NULL,
            record_count BIGINT NOT NULL CHECK (record_count >= 0),
            media_count BIGINT NOT NULL CHECK (media_count >= 0),
            size_bytes BIGINT NOT NULL CHECK (size_bytes >= 0),
            date_range_start TIMESTAMPTZ,
            date_range_end TIMESTAMPTZ,
            manifest_path TEXT,
            CHECK ((date_range_start IS NULL) = (date_range_end IS NULL)),
            CHECK (date_range_end IS NULL OR date_range_end >= date_range_start)
        )"
    );

    // Serves the owner-scoped, newest-first listing query.
    let create_owner_idx = format!(
        "CREATE INDEX IF NOT EXISTS {}artifacts_owner_created_idx \
         ON {table} (owner_id, created_at DESC, id DESC)",
        config.table_prefix
    );

    sqlx::query(&create_artifacts).execute(pool).await?;
    sqlx::query(&create_owner_idx).execute(pool).await?;

    Ok(())
}
