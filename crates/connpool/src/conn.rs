//! Buffered, deadline-aware connection wrapper.
//!
//! [`Conn`] decorates a raw byte stream with inbound and outbound buffers and
//! adds the operations protocol code needs on a shared connection:
//!
//! - `write` always flushes before returning, so no request bytes linger
//! - `read_until` reads a delimited frame under a deadline
//! - `drain_buffered` empties bytes that are already buffered but unread,
//!   without touching the network
//!
//! Deadlines are absolute instants kept on the wrapper. Every read honours the
//! read deadline and every write honours the write deadline; an operation that
//! outlives its deadline fails with [`ConnError::Timeout`].
//!
//! # Layout
//!
//! ```text
//! Conn
//!   └── BufReader       (inbound buffer, drained between requests)
//!         └── BufWriter (outbound buffer, flushed on every write)
//!               └── S   (raw stream: TcpStream, DuplexStream, ...)
//! ```

use std::fmt;
use std::future::Future;
use std::io;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tokio::time::Instant;

use crate::error::{ConnError, DrainError};

/// A raw stream wrapped with buffers and deadlines.
///
/// Not shareable: every operation takes `&mut self`. The pool hands a
/// `&mut Conn` to exactly one work unit at a time.
pub struct Conn<S> {
    inner: BufReader<BufWriter<S>>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(BufWriter::new(stream)),
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Wrap with explicit inbound and outbound buffer sizes.
    pub fn with_capacity(read_capacity: usize, write_capacity: usize, stream: S) -> Self {
        Self {
            inner: BufReader::with_capacity(
                read_capacity,
                BufWriter::with_capacity(write_capacity, stream),
            ),
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Buffer `buf` and flush it. Returns the number of bytes accepted.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, ConnError> {
        let inner = &mut self.inner;
        within(self.write_deadline, async move {
            inner.write_all(buf).await?;
            inner.flush().await
        })
        .await?;
        Ok(buf.len())
    }

    /// Read whatever is available, up to `buf.len()` bytes. `Ok(0)` is end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        within(self.read_deadline, self.inner.read(buf)).await
    }

    /// Fill `buf` completely or fail.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConnError> {
        within(self.read_deadline, self.inner.read_exact(buf)).await?;
        Ok(())
    }

    /// Read up to and including `delim`.
    ///
    /// Sets the read deadline to `deadline` first. End of stream before the
    /// delimiter is reported as [`io::ErrorKind::UnexpectedEof`].
    pub async fn read_until(&mut self, delim: u8, deadline: Instant) -> Result<Vec<u8>, ConnError> {
        self.read_deadline = Some(deadline);
        let mut frame = Vec::new();
        within(self.read_deadline, self.inner.read_until(delim, &mut frame)).await?;
        if frame.last() != Some(&delim) {
            return Err(ConnError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} bytes without delimiter", frame.len()),
            )));
        }
        Ok(frame)
    }

    /// Remove and return every byte already sitting in the inbound buffer.
    ///
    /// Sets the read deadline to `deadline`. Only bytes buffered before the
    /// call are taken; nothing new is requested from the peer. A read can come
    /// back short, so this loops until the buffered count is reached. On
    /// failure the bytes recovered so far travel with the error.
    pub async fn drain_buffered(&mut self, deadline: Instant) -> Result<Vec<u8>, DrainError> {
        self.read_deadline = Some(deadline);

        let total = self.inner.buffer().len();
        let mut drained = Vec::with_capacity(total);

        while drained.len() < total {
            let mut chunk = vec![0u8; total - drained.len()];
            match within(self.read_deadline, self.inner.read(&mut chunk)).await {
                Ok(0) => {
                    return Err(DrainError {
                        drained,
                        source: ConnError::Io(io::ErrorKind::UnexpectedEof.into()),
                    });
                }
                Ok(n) => drained.extend_from_slice(&chunk[..n]),
                Err(source) => return Err(DrainError { drained, source }),
            }
        }

        Ok(drained)
    }

    /// Number of inbound bytes buffered and not yet read.
    pub fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }

    /// Set (or clear, with `None`) both deadlines.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
        self.write_deadline = deadline;
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        self.read_deadline
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        self.write_deadline
    }

    /// The raw stream underneath both buffers.
    pub fn get_ref(&self) -> &S {
        self.inner.get_ref().get_ref()
    }

    /// Mutable access to the raw stream. Bytes written here bypass the
    /// outbound buffer and bytes read here bypass the inbound buffer.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut().get_mut()
    }

    /// Unwrap the raw stream. Any buffered inbound bytes are lost.
    pub fn into_inner(self) -> S {
        self.inner.into_inner().into_inner()
    }

    /// Flush pending output and shut down the write half of the stream.
    ///
    /// Bounded by the write deadline.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        within(self.write_deadline, self.inner.shutdown()).await
    }
}

impl<S> fmt::Debug for Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("buffered", &self.inner.buffer().len())
            .field("read_deadline", &self.read_deadline)
            .field("write_deadline", &self.write_deadline)
            .finish_non_exhaustive()
    }
}

/// Run `op` to completion, or until `deadline` if one is set.
async fn within<T, F>(deadline: Option<Instant>, op: F) -> Result<T, ConnError>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, op).await {
            Ok(result) => result.map_err(ConnError::from),
            Err(_) => Err(ConnError::Timeout),
        },
        None => op.await.map_err(ConnError::from),
    }
}
