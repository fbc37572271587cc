mod artifacts;
mod auth;
mod catalog;
mod server;
mod telemetry;


pub use artifacts::*;
pub use auth::*;
pub use catalog::*;
pub use server::*;
pub use telemetry::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the Strongbox server, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct StrongboxConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact root and download limits.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Catalog backend configuration.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Requester identification and anti-forgery settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// OpenTelemetry distributed tracing configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl StrongboxConfig {
    /// Read and parse `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                ServerError::Config(format!("failed to parse {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ServerError::Config(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.artifacts.max_concurrent_downloads_per_owner == 0 {
            return Err(ServerError::Config(
                "artifacts.max_concurrent_downloads_per_owner must be at least 1".to_owned(),
            ));
        }
        if self.artifacts.default_page_size == 0
            || self.artifacts.default_page_size > self.artifacts.max_page_size
        {
            return Err(ServerError::Config(
                "artifacts.default_page_size must be between 1 and max_page_size".to_owned(),
            ));
        }
        if self.artifacts.root.trim().is_empty() {
            return Err(ServerError::Config("artifacts.root must be set".to_owned()));
        }
        if !(0.0..=1.0).contains(&self.telemetry.sample_ratio) {
            return Err(ServerError::Config(
                "telemetry.sample_ratio must be within 0.0..=1.0".to_owned(),
            ));
        }
        for key in &self.auth.api_keys {
            if !hex::decode(&key.key_hash).is_ok_and(|raw| raw.len() == 32) {
                return Err(ServerError::Config(format!(
                    "auth.api_keys entry for {} must be a hex SHA-256 digest",
                    key.owner
                )));
            }
        }
        Ok(())
    }
}
