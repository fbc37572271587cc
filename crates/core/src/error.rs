use thiserror::Error;

/// Malformed or unsafe input rejected before it reaches storage or the
/// filesystem.
///
/// Messages never include the artifact root itself, only the offending
/// user-supplied fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("path is empty")]
    EmptyPath,

    #[error("path contains a null byte")]
    NullByte,

    #[error("path traversal is not allowed: {0}")]
    Traversal(String),

    #[error("path escapes the artifact root: {0}")]
    Escape(String),

    #[error("path must name an entry below the artifact root")]
    RootItself,

    #[error("invalid artifact id: {0}")]
    InvalidId(String),

    #[error("artifact id {id} does not belong to owner {owner}")]
    OwnerMismatch { id: String, owner: String },

    #[error("artifact directory does not match its id: {0}")]
    DirectoryMismatch(String),

    #[error("artifact location is not a plain directory: {0}")]
    NotADirectory(String),

    #[error("artifact timestamp is not YYYYMMDD-HHMMSS: {0}")]
    InvalidTimestamp(String),

    #[error("unknown export format: {0}")]
    UnknownFormat(String),

    #[error("date range end {end} precedes start {start}")]
    DateRange { start: String, end: String },

    #[error("date range must set both start and end, or neither")]
    HalfOpenDateRange,

    #[error("invalid manifest: {0}")]
    Manifest(String),
}
