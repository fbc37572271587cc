pub mod artifact;
pub mod confinement;
pub mod error;
pub mod manifest;
pub mod types;

pub use artifact::{ExportArtifact, ExportFormat};
pub use confinement::ArtifactRoot;
pub use error::ValidationError;
pub use manifest::{ArtifactManifest, MANIFEST_FILE_NAME};
pub use types::{ArtifactId, OwnerId};
