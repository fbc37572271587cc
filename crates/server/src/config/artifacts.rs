use serde::Deserialize;
use strongbox_core::ExportFormat;

/// Where artifacts live and how they may be fetched.
///
/// # Example
///
/// ```toml
/// [artifacts]
/// root = "/var/lib/strongbox/exports"
/// max_concurrent_downloads_per_owner = 4
/// retry_after_seconds = 10
/// default_format = "json"
/// ```
#[derive(Debug, Deserialize)]
pub struct ArtifactsConfig {
    /// Artifact root directory. Made absolute at startup.
    #[serde(default = "default_root")]
    pub root: String,
    /// Ceiling on concurrently streaming downloads per owner.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads_per_owner: usize,
    /// `Retry-After` hint, in seconds, sent with 429 responses.
    #[serde(default = "default_retry_after")]
    pub retry_after_seconds: u64,
    /// Listing page size when the request gives no `limit`.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    /// Upper bound applied to any requested `limit`.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Format assumed for artifact directories without a `manifest.json`
    /// when the memory catalog is rebuilt at startup.
    #[serde(default)]
    pub default_format: Option<ExportFormat>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_concurrent_downloads_per_owner: default_max_concurrent(),
            retry_after_seconds: default_retry_after(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            default_format: None,
        }
    }
}

fn default_root() -> String {
    "data/exports".to_owned()
}

fn default_max_concurrent() -> usize {
    10
}

fn default_retry_after() -> u64 {
    5
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    200
}
