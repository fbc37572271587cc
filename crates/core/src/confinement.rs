//! Lexical confinement of artifact paths under a single artifact root.
//!
//! Every stored `directory_path` must resolve, without touching the
//! filesystem, to an entry strictly below the root. The same check runs when
//! an artifact is catalogued and again right before any read or delete, since
//! catalog rows may have been altered in between.

use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;
use crate::types::ArtifactId;

/// The well-known directory all export artifacts live under.
///
/// Layout: `{root}/{owner}/{timestamp}/...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRoot {
    root: PathBuf,
}

impl ArtifactRoot {
    /// Wrap `root`. `.` components are dropped so lexical prefix checks line
    /// up with the paths produced by [`confine`](Self::confine).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        Self { root }
    }

    /// The root directory itself.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Validate `path` and return the confined location below the root.
    ///
    /// Relative paths are interpreted relative to the root. Absolute paths
    /// must lie lexically under it. Any `..` segment is rejected outright,
    /// as are null bytes, empty input and the root itself.
    pub fn confine(&self, path: &str) -> Result<PathBuf, ValidationError> {
        if path.is_empty() {
            return Err(ValidationError::EmptyPath);
        }
        if path.contains('\0') {
            return Err(ValidationError::NullByte);
        }

        let normalized = path.replace('\\', "/");
        let candidate = Path::new(&normalized);

        let remainder = if candidate.has_root() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| ValidationError::Escape(path.to_owned()))?
        } else {
            candidate
        };

        let mut confined = PathBuf::new();
        for component in remainder.components() {
            match component {
                Component::Normal(segment) => confined.push(segment),
                Component::CurDir => {}
                Component::ParentDir => return Err(ValidationError::Traversal(path.to_owned())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ValidationError::Escape(path.to_owned()));
                }
            }
        }

        if confined.as_os_str().is_empty() {
            return Err(ValidationError::RootItself);
        }

        Ok(self.root.join(confined))
    }

    /// Directory an artifact with the given ID is stored in.
    pub fn artifact_dir(&self, id: &ArtifactId) -> Result<PathBuf, ValidationError> {
        id.segments()?;
        self.confine(id.as_str())
    }

    /// Strip the root from an already confined path.
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }
}
