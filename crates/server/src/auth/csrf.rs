//! Double-submit anti-forgery check for state-changing requests.
//!
//! The client echoes the value of the CSRF cookie in a request header. A
//! cross-site form can make the browser send the cookie but cannot read it
//! to fill in the header.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("missing anti-forgery token")]
    Missing,
    #[error("anti-forgery token mismatch")]
    Mismatch,
}

/// Names of the cookie and header that must carry the same token.
#[derive(Debug, Clone)]
pub struct CsrfSettings {
    cookie: String,
    header: String,
}

impl CsrfSettings {
    pub fn new(cookie: &str, header: &str) -> Self {
        Self {
            cookie: cookie.to_owned(),
            header: header.to_ascii_lowercase(),
        }
    }

    /// Accept the request only if the header token equals the cookie token.
    pub fn verify(&self, headers: &HeaderMap) -> Result<(), CsrfError> {
        let header = headers
            .get(self.header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        let cookie = cookie_value(headers, &self.cookie).filter(|v| !v.is_empty());

        let result = match (header, cookie) {
            (Some(header), Some(cookie)) => {
                if bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) {
                    Ok(())
                } else {
                    Err(CsrfError::Mismatch)
                }
            }
            _ => Err(CsrfError::Missing),
        };
        if let Err(e) = result {
            warn!(target: "security", reason = %e, "anti-forgery check failed");
        }
        result
    }
}

/// First value of the named cookie across all `Cookie` headers.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}
