use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure while producing or delivering an archive.
///
/// Any variant means the archive did not reach its consumer intact.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A file or directory under the artifact could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The consumer went away before the archive was complete.
    #[error("archive sink closed before the archive was complete")]
    Disconnected,

    /// The sink rejected a write for any other reason.
    #[error("failed to write archive: {0}")]
    Write(#[source] io::Error),
}

impl StreamError {
    /// Classify an I/O error raised by the sink.
    pub(crate) fn from_sink(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => Self::Disconnected,
            _ => Self::Write(err),
        }
    }

    /// Whether the failure was the consumer disconnecting.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}
