use std::collections::HashMap;

use sha2::{Digest, Sha256};

use strongbox_core::OwnerId;

use super::identity::RequesterIdentity;
use crate::config::ApiKeyConfig;

/// An entry in the API key lookup table.
#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub owner: OwnerId,
}

/// Build an in-memory lookup from `sha256_hex(raw_key) -> ApiKeyEntry`.
///
/// The config stores pre-computed SHA-256 hashes of the raw keys.
pub fn build_api_key_table(configs: &[ApiKeyConfig]) -> HashMap<String, ApiKeyEntry> {
    configs
        .iter()
        .map(|cfg| {
            (
                cfg.key_hash.to_ascii_lowercase(),
                ApiKeyEntry {
                    owner: OwnerId::new(cfg.owner.clone()),
                },
            )
        })
        .collect()
}

/// Hash a raw API key to the lookup format (lowercase hex SHA-256).
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Look up an API key and return a `RequesterIdentity` if found.
#[allow(clippy::implicit_hasher)]
pub fn authenticate_api_key(
    raw_key: &str,
    table: &HashMap<String, ApiKeyEntry>,
) -> Option<RequesterIdentity> {
    let hash = hash_api_key(raw_key);
    table.get(&hash).map(|entry| RequesterIdentity {
        owner: entry.owner.clone(),
        auth_method: "api_key".to_owned(),
    })
}
