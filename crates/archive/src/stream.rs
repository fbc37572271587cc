use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::{Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::StreamError;
use crate::sink::ArchiveSink;

/// Outcome of a completed [`stream_directory`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Regular files written into the archive.
    pub files: u64,
    /// Entries skipped because they were neither directories nor regular files.
    pub skipped: u64,
    /// Compressed bytes handed to the sink.
    pub bytes_written: u64,
}

/// Write `root` as a gzip-compressed tar archive into `sink`.
///
/// The tree is walked depth-first in file-name order without following
/// symbolic links. Only regular files become entries, named by their path
/// relative to `root`; directories are implied by those names and symlinks
/// or special files are skipped.
///
/// On success the sink's [`finish`](ArchiveSink::finish) has returned `Ok`.
/// On failure the sink has been [`abort`](ArchiveSink::abort)ed and no
/// further bytes reach it, including the archive trailer.
pub fn stream_directory<S>(root: &Path, sink: &mut S) -> Result<StreamSummary, StreamError>
where
    S: ArchiveSink + ?Sized,
{
    let result = write_archive(root, SealableWriter::new(sink));
    match result {
        Ok(summary) => {
            sink.finish().map_err(StreamError::from_sink)?;
            Ok(summary)
        }
        Err(err) => {
            sink.abort(&err.to_string());
            Err(err)
        }
    }
}

fn write_archive<S>(root: &Path, writer: SealableWriter<'_, S>) -> Result<StreamSummary, StreamError>
where
    S: ArchiveSink + ?Sized,
{
    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));
    builder.follow_symlinks(false);

    match append_tree(&mut builder, root) {
        Ok((files, skipped)) => {
            let writer = builder
                .into_inner()
                .and_then(GzEncoder::finish)
                .map_err(StreamError::from_sink)?;
            Ok(StreamSummary {
                files,
                skipped,
                bytes_written: writer.written,
            })
        }
        Err(err) => {
            let writer = builder.get_mut().get_mut();
            let err = match writer.failure.take() {
                Some(sink_err) => StreamError::from_sink(sink_err),
                None => err,
            };
            // Dropping the builder would otherwise emit the tar and gzip
            // trailers and make a truncated archive look complete.
            writer.sealed = true;
            Err(err)
        }
    }
}

fn append_tree<W: Write>(builder: &mut Builder<W>, root: &Path) -> Result<(u64, u64), StreamError> {
    let mut files = 0u64;
    let mut skipped = 0u64;

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            StreamError::Read {
                path,
                source: e.into(),
            }
        })?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            debug!(path = %path.display(), "skipping non-regular entry");
            skipped += 1;
            continue;
        }

        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let read_err = |source: io::Error| StreamError::Read {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(read_err)?;
        let metadata = file.metadata().map_err(read_err)?;
        if !metadata.is_file() {
            // Swapped for something else between the walk and the open.
            skipped += 1;
            continue;
        }

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mode(0o644);
        header.set_mtime(
            metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs()),
        );

        builder
            .append_data(&mut header, rel, SizedReader::new(file, metadata.len()))
            .map_err(read_err)?;
        files += 1;
    }

    Ok((files, skipped))
}

/// Reads exactly the byte count recorded in the entry header.
///
/// A file that grows while streaming is cut at its recorded size; one that
/// shrinks is an error, since the header already promised more bytes.
struct SizedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = usize::try_from(self.remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// Forwards to the sink, remembering the first sink error so it can be told
/// apart from read errors, and refusing all writes once sealed.
struct SealableWriter<'a, S: ?Sized> {
    sink: &'a mut S,
    written: u64,
    failure: Option<io::Error>,
    sealed: bool,
}

impl<'a, S: ArchiveSink + ?Sized> SealableWriter<'a, S> {
    fn new(sink: &'a mut S) -> Self {
        Self {
            sink,
            written: 0,
            failure: None,
            sealed: false,
        }
    }

    fn record(&mut self, err: io::Error) -> io::Error {
        let copy = io::Error::new(err.kind(), err.to_string());
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        copy
    }
}

impl<S: ArchiveSink + ?Sized> Write for SealableWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sealed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive aborted"));
        }
        match self.sink.write(buf) {
            Ok(n) => {
                self.written += n as u64;
                Ok(n)
            }
            Err(e) => Err(self.record(e)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.sealed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "archive aborted"));
        }
        self.sink.flush().map_err(|e| self.record(e))
    }
}

/// Size of an artifact directory as catalogued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub files: u64,
    pub bytes: u64,
}

/// Walk `root` once and total the sizes of its regular files, with the same
/// rules as [`stream_directory`] for what counts as content.
pub fn measure_directory(root: &Path) -> io::Result<DirectoryStats> {
    let mut stats = DirectoryStats::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file() {
            stats.files += 1;
            stats.bytes += entry.metadata()?.len();
        }
    }
    Ok(stats)
}
