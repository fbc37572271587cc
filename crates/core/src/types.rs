use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[cfg_attr(feature = "openapi", schema(value_type = String))]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(OwnerId, "Identity that created, and exclusively may access, an artifact.");
newtype_string!(
    ArtifactId,
    "Artifact identifier of the form `{owner}/{timestamp}`, doubling as its path below the artifact root."
);

/// Timestamp layout used for the second segment of generated artifact IDs.
pub const ARTIFACT_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

impl ArtifactId {
    /// Build the conventional ID for an artifact created by `owner` at `created_at`.
    #[must_use]
    pub fn for_owner(owner: &OwnerId, created_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{owner}/{}",
            created_at.format(ARTIFACT_TIMESTAMP_FORMAT)
        ))
    }

    /// Split the ID into its `(owner, timestamp)` segments after checking
    /// that each is a safe single path segment.
    pub fn segments(&self) -> Result<(&str, &str), ValidationError> {
        let mut parts = self.0.split('/');
        let (Some(owner), Some(stamp), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ValidationError::InvalidId(self.0.clone()));
        };
        if !is_safe_segment(owner) || !is_safe_segment(stamp) {
            return Err(ValidationError::InvalidId(self.0.clone()));
        }
        Ok((owner, stamp))
    }
}

/// A segment is safe when it cannot be interpreted as anything but a plain
/// child directory name. Owner identities such as `did:plc:…` or non-ASCII
/// names are fine; separators, NUL and dot segments are not.
pub(crate) fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn for_owner_embeds_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let id = ArtifactId::for_owner(&OwnerId::from("u1"), at);
        assert_eq!(id.as_str(), "u1/20240309-140507");
        assert_eq!(id.segments().unwrap(), ("u1", "20240309-140507"));
    }

    #[test]
    fn segments_rejects_malformed_ids() {
        for raw in [
            "",
            "u1",
            "u1/",
            "/20240101",
            "u1/2024/extra",
            "../20240101",
            "u1/..",
            "./20240101",
            "u1/.",
            "u1/a\0b",
            "u1/a\\b",
            "a\\b/2024",
        ] {
            assert!(
                ArtifactId::from(raw).segments().is_err(),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn segments_accepts_email_like_owners() {
        for raw in [
            "alice+exports@example.org/20240101-000000",
            "did:plc:abc123/20240101-000000",
            "zoë.ōkami/20240101-000000",
            "u 1/.hidden",
        ] {
            assert!(ArtifactId::from(raw).segments().is_ok(), "{raw:?} should be accepted");
        }
        assert_eq!(
            ArtifactId::from("did:plc:abc123/20240101-000000")
                .segments()
                .unwrap(),
            ("did:plc:abc123", "20240101-000000")
        );
    }
}
