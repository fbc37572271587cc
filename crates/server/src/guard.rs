use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use strongbox_core::{ArtifactId, ArtifactRoot, ExportArtifact, OwnerId, ValidationError};

/// A requester asked for an artifact they do not own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{requester} does not own artifact {artifact_id}")]
pub struct AccessDenied {
    pub artifact_id: ArtifactId,
    pub requester: OwnerId,
}

/// Ownership and path-confinement checks applied before any artifact is
/// read or removed.
///
/// Both checks emit `warn` events on the `security` target when they fail.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    root: ArtifactRoot,
}

impl AccessGuard {
    pub fn new(root: ArtifactRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ArtifactRoot {
        &self.root
    }

    /// Fail unless `requester` is the artifact's owner.
    pub fn check_ownership(
        &self,
        artifact: &ExportArtifact,
        requester: &OwnerId,
    ) -> Result<(), AccessDenied> {
        if artifact.owner_id == *requester {
            return Ok(());
        }
        warn!(
            target: "security",
            requester = %requester,
            artifact_id = %artifact.id,
            owner = %artifact.owner_id,
            "artifact access denied: requester is not the owner"
        );
        Err(AccessDenied {
            artifact_id: artifact.id.clone(),
            requester: requester.clone(),
        })
    }

    /// Confine an arbitrary path under the artifact root.
    pub fn validate_path_confinement(&self, path: &str) -> Result<PathBuf, ValidationError> {
        self.root.confine(path).inspect_err(|e| {
            warn!(target: "security", error = %e, "rejected unconfined artifact path");
        })
    }

    /// Re-check a stored row right before touching its files and return the
    /// directory it is allowed to address.
    ///
    /// Rows may have been altered since they were catalogued, so every
    /// invariant is checked again, not only confinement.
    pub fn artifact_directory(&self, artifact: &ExportArtifact) -> Result<PathBuf, ValidationError> {
        artifact.validate(&self.root).inspect_err(|e| {
            warn!(
                target: "security",
                artifact_id = %artifact.id,
                owner = %artifact.owner_id,
                error = %e,
                "stored artifact row failed validation"
            );
        })?;
        self.validate_path_confinement(&artifact.directory_path)
    }
}
