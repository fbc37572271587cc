//! Requester identification and anti-forgery checks.
//!
//! Every protected route learns who is calling from a [`RequesterIdentity`]
//! request extension inserted by [`middleware::AuthLayer`]. Identity comes
//! from an `x-api-key` header matched against SHA-256 digests in config, or,
//! when configured, from a header set by an authenticating reverse proxy.

pub mod api_key;
pub mod csrf;
pub mod identity;
pub mod middleware;

use std::collections::HashMap;

use axum::http::HeaderMap;
use tracing::{info, warn};

use strongbox_core::OwnerId;

use self::api_key::{ApiKeyEntry, authenticate_api_key, build_api_key_table};
use self::csrf::CsrfSettings;
use self::identity::RequesterIdentity;
use crate::config::AuthConfig;

/// Header carrying a raw API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Why a request could not be attributed to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    InvalidKey,
}

impl AuthFailure {
    pub fn message(self) -> &'static str {
        match self {
            Self::Missing => "missing authentication credentials",
            Self::InvalidKey => "invalid API key",
        }
    }
}

/// Central auth provider built once at startup.
pub struct AuthProvider {
    /// SHA-256 hex hash to `ApiKeyEntry` lookup table.
    api_keys: HashMap<String, ApiKeyEntry>,
    trusted_header: Option<String>,
    csrf: CsrfSettings,
}

impl AuthProvider {
    pub fn from_config(config: &AuthConfig) -> Self {
        let api_keys = build_api_key_table(&config.api_keys);
        info!(
            api_keys = api_keys.len(),
            trusted_header = config.trusted_identity_header.is_some(),
            "auth provider initialized"
        );
        Self {
            api_keys,
            trusted_header: config
                .trusted_identity_header
                .as_ref()
                .map(|h| h.to_ascii_lowercase()),
            csrf: CsrfSettings::new(&config.csrf_cookie, &config.csrf_header),
        }
    }

    pub fn csrf(&self) -> &CsrfSettings {
        &self.csrf
    }

    /// Resolve the requester from request headers.
    ///
    /// An API key, when present, must be valid; it is never overridden by
    /// the trusted header.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<RequesterIdentity, AuthFailure> {
        if let Some(raw) = headers.get(API_KEY_HEADER) {
            let identity = raw
                .to_str()
                .ok()
                .and_then(|key| authenticate_api_key(key, &self.api_keys));
            return identity.ok_or_else(|| {
                warn!(target: "security", "request rejected: invalid API key");
                AuthFailure::InvalidKey
            });
        }

        if let Some(header) = &self.trusted_header
            && let Some(value) = headers.get(header.as_str())
            && let Ok(owner) = value.to_str()
            && !owner.trim().is_empty()
        {
            return Ok(RequesterIdentity {
                owner: OwnerId::from(owner.trim()),
                auth_method: "trusted_header".to_owned(),
            });
        }

        Err(AuthFailure::Missing)
    }
}
