mod config;
mod migrations;
mod store;

pub use config::PostgresCatalogConfig;
pub use store::PostgresArtifactCatalog;
