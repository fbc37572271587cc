//! Bridge between the blocking archive writer and an HTTP response body.
//!
//! [`ChannelSink`] runs on a blocking thread and hands fixed-size chunks to
//! [`DeliveryBody`] through a small bounded channel, so a slow client stalls
//! the writer instead of growing a buffer. The sink only reports a clean
//! finish once the body has yielded every chunk, and the body only ends once
//! the task that owns the delivery has settled. Together this means a
//! response that completes normally has already had its post-delivery
//! cleanup applied, and one that is dropped early never triggers it.

use std::future::Future;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use strongbox_archive::ArchiveSink;

/// Largest chunk handed to the response body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks that may be queued ahead of the client.
const CHANNEL_DEPTH: usize = 4;

/// Create a connected sink/body pair.
pub fn channel() -> (ChannelSink, DeliveryBody) {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let (delivered_tx, delivered_rx) = oneshot::channel();
    (
        ChannelSink {
            tx: Some(tx),
            buf: BytesMut::with_capacity(CHUNK_SIZE),
            delivered: Some(delivered_rx),
        },
        DeliveryBody {
            rx,
            delivered: Some(delivered_tx),
            settle: None,
            done: false,
        },
    )
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")
}

/// Blocking writer end. Must not be used from an async context.
pub struct ChannelSink {
    tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    buf: BytesMut,
    delivered: Option<oneshot::Receiver<()>>,
}

impl ChannelSink {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let tx = self.tx.as_ref().ok_or_else(disconnected)?;
        let chunk = self.buf.split().freeze();
        tx.blocking_send(Ok(chunk)).map_err(|_| disconnected())
    }
}

impl Write for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let n = (CHUNK_SIZE - self.buf.len()).min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl ArchiveSink for ChannelSink {
    /// Send what is buffered, close the channel, then block until the body
    /// has handed every chunk on.
    fn finish(&mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.tx = None;
        match self.delivered.take() {
            Some(delivered) => delivered.blocking_recv().map_err(|_| disconnected()),
            None => Err(disconnected()),
        }
    }

    fn abort(&mut self, reason: &str) {
        self.buf.clear();
        self.delivered = None;
        if let Some(tx) = self.tx.take() {
            // If the queue is full the body still ends with an error once
            // the settling task reports failure.
            let _ = tx.try_send(Err(io::Error::other(reason.to_owned())));
        }
    }
}

/// Async reader end, usable as an `axum::body::Body` stream.
pub struct DeliveryBody {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    delivered: Option<oneshot::Sender<()>>,
    settle: Option<JoinHandle<bool>>,
    done: bool,
}

impl DeliveryBody {
    /// Hold the end of the body until `task` resolves.
    ///
    /// `true` ends the body cleanly. `false`, or a task that panicked, ends
    /// it with an error so the client sees a truncated transfer.
    #[must_use]
    pub fn settled_by(mut self, task: JoinHandle<bool>) -> Self {
        self.settle = Some(task);
        self
    }
}

impl Stream for DeliveryBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.delivered.is_some() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => return Poll::Ready(Some(Ok(chunk))),
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    if let Some(delivered) = this.delivered.take() {
                        let _ = delivered.send(());
                    }
                }
            }
        }

        let Some(task) = this.settle.as_mut() else {
            this.done = true;
            return Poll::Ready(None);
        };
        let settled = ready!(Pin::new(task).poll(cx));
        this.settle = None;
        this.done = true;
        match settled {
            Ok(true) => Poll::Ready(None),
            Ok(false) => Poll::Ready(Some(Err(io::Error::other(
                "archive delivery did not complete",
            )))),
            Err(e) => Poll::Ready(Some(Err(io::Error::other(e)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn chunks_are_bounded_and_finish_waits_for_drain() {
        let (mut sink, body) = channel();
        let data: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = data.clone();

        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(&data)?;
            sink.finish()
        });
        let chunks: Vec<Bytes> = body.map(|c| c.unwrap()).collect().await;

        assert!(chunks.iter().all(|c| c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.concat(), expected);
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_body_surfaces_as_broken_pipe() {
        let (mut sink, body) = channel();
        drop(body);
        let err = tokio::task::spawn_blocking(move || sink.write_all(&vec![0u8; CHUNK_SIZE]))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn finish_fails_when_body_is_dropped_before_draining() {
        let (mut sink, mut body) = channel();
        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(&vec![1u8; 3 * CHUNK_SIZE])?;
            sink.finish()
        });
        assert!(body.next().await.unwrap().is_ok());
        drop(body);
        let err = writer.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn body_ends_only_after_settling_task() {
        let (mut sink, body) = channel();
        let writer = tokio::task::spawn_blocking(move || {
            sink.write_all(b"archive bytes")?;
            sink.finish()
        });
        let settle = tokio::spawn(async move { matches!(writer.await, Ok(Ok(()))) });

        let items: Vec<_> = body.settled_by(settle).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(&items[0].as_ref().unwrap()[..], b"archive bytes");
    }

    #[tokio::test]
    async fn failed_settlement_ends_body_with_error() {
        let (mut sink, body) = channel();
        let body = body.settled_by(tokio::spawn(async { false }));
        let _writer = tokio::task::spawn_blocking(move || {
            sink.write_all(b"abc")?;
            sink.finish()
        });

        let items: Vec<_> = body.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn abort_reaches_the_body_as_an_error() {
        let (mut sink, body) = channel();
        tokio::task::spawn_blocking(move || {
            sink.write_all(b"partial").unwrap();
            sink.abort("source file vanished");
        })
        .await
        .unwrap();

        let items: Vec<_> = body.collect().await;
        assert_eq!(items.len(), 1);
        assert!(
            items[0]
                .as_ref()
                .unwrap_err()
                .to_string()
                .contains("source file vanished")
        );
    }
}
