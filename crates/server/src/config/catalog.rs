use serde::Deserialize;

/// Which catalog backend to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogBackend {
    /// In-process map. Rows are lost on restart.
    #[default]
    Memory,
    /// PostgreSQL table. Requires the `postgres` feature.
    Postgres,
}

/// Catalog backend configuration.
#[derive(Debug, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub backend: CatalogBackend,
    /// Connection URL for database backends.
    pub url: Option<String>,
    /// Maximum pool connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Database schema holding the artifacts table.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Prefix applied to table names.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    /// SSL mode (`disable`, `prefer`, `require`, `verify-ca`, `verify-full`).
    pub ssl_mode: Option<String>,
    /// Path to a CA certificate for `verify-ca` / `verify-full`.
    pub ssl_root_cert: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: CatalogBackend::default(),
            url: None,
            pool_size: default_pool_size(),
            schema: default_schema(),
            table_prefix: default_table_prefix(),
            ssl_mode: None,
            ssl_root_cert: None,
        }
    }
}

fn default_pool_size() -> u32 {
    5
}

fn default_schema() -> String {
    "public".to_owned()
}

fn default_table_prefix() -> String {
    "strongbox_".to_owned()
}
