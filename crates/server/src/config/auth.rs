use serde::Deserialize;

/// An API key accepted for one owner. Only the SHA-256 hex digest is stored.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub owner: String,
    pub key_hash: String,
}

/// Requester identification and anti-forgery settings.
///
/// # Example
///
/// ```toml
/// [auth]
/// trusted_identity_header = "x-authenticated-user"
///
/// [[auth.api_keys]]
/// owner = "alice"
/// key_hash = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
/// ```
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
    /// Header set by an authenticating reverse proxy. Only enable this when
    /// the server is unreachable except through that proxy.
    pub trusted_identity_header: Option<String>,
    #[serde(default = "default_csrf_cookie")]
    pub csrf_cookie: String,
    #[serde(default = "default_csrf_header")]
    pub csrf_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            trusted_identity_header: None,
            csrf_cookie: default_csrf_cookie(),
            csrf_header: default_csrf_header(),
        }
    }
}

fn default_csrf_cookie() -> String {
    "csrf_token".to_owned()
}

fn default_csrf_header() -> String {
    "x-csrf-token".to_owned()
}
