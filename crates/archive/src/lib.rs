//! Streaming of an artifact directory as a single `tar.gz` byte stream.
//!
//! The archive is produced incrementally: one regular file at a time is
//! copied through a fixed-size buffer into the gzip encoder, which writes
//! straight into an [`ArchiveSink`]. Neither the archive nor any single file
//! is ever held in memory.

pub mod error;
pub mod sink;
pub mod stream;

pub use error::StreamError;
pub use sink::ArchiveSink;
pub use stream::{DirectoryStats, StreamSummary, measure_directory, stream_directory};

/// Media type of the produced archive.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/gzip";
