use std::io::{self, Write};

/// Destination of an archive byte stream.
///
/// Beyond plain writes, a sink learns how the stream ended: [`finish`] is
/// called exactly once after the last byte of a complete archive, [`abort`]
/// exactly once when the stream failed. A sink never sees both.
///
/// [`finish`]: ArchiveSink::finish
/// [`abort`]: ArchiveSink::abort
pub trait ArchiveSink: Write + Send {
    /// The archive is complete. Returning an error marks the delivery failed.
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }

    /// The archive is incomplete and no more bytes will follow.
    fn abort(&mut self, _reason: &str) {}
}

impl ArchiveSink for Vec<u8> {}
