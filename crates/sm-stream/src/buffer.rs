//! Flow-controlled receive buffer
//!
//! A `StreamBuffer` sits between a transport (which calls [`StreamBuffer::feed`])
//! and a single consumer (which calls one of the read methods). Memory is bounded
//! by `limit`: once the buffer grows past it the buffer is marked paused and the
//! producer is expected to wait in [`StreamBuffer::wait_resumed`] until a read
//! drains it again.
//!
//! Delimiter-seeking reads never truncate silently. They either return a complete
//! chunk ending in the separator, fail with [`StreamError::LimitOverrun`] leaving
//! the buffer intact, or fail with [`StreamError::IncompleteRead`] once the
//! stream has ended.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::StreamError;

/// Default buffer limit (64 KiB)
pub const DEFAULT_LIMIT: usize = 64 * 1024;

/// Bounded byte accumulator shared by a producer and one reader
#[derive(Debug)]
pub struct StreamBuffer {
    limit: usize,
    inner: Mutex<Inner>,
    /// Wakes the pending reader when data or EOF arrives
    data_ready: Notify,
    /// Wakes the producer when the buffer drains below the limit
    resumed: Notify,
}

#[derive(Debug, Default)]
struct Inner {
    buf: BytesMut,
    eof: bool,
    paused: bool,
    reading: bool,
    error: Option<(io::ErrorKind, String)>,
}

impl Inner {
    fn stored_error(&self) -> Option<StreamError> {
        self.error
            .as_ref()
            .map(|(kind, msg)| StreamError::Io(io::Error::new(*kind, msg.clone())))
    }
}

/// Clears the reader slot when a read finishes or is cancelled
struct ReadGuard<'a> {
    buffer: &'a StreamBuffer,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.buffer.lock().reading = false;
    }
}

impl StreamBuffer {
    /// Create a buffer with the given limit. A zero limit is rejected.
    pub fn new(limit: usize) -> Result<Self, StreamError> {
        if limit == 0 {
            return Err(StreamError::Configuration(
                "buffer limit must be a positive integer".to_string(),
            ));
        }

        Ok(Self {
            limit,
            inner: Mutex::new(Inner::default()),
            data_ready: Notify::new(),
            resumed: Notify::new(),
        })
    }

    /// Configured limit in bytes
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Check if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    /// Whether end of stream has been signalled
    pub fn is_eof(&self) -> bool {
        self.lock().eof
    }

    /// End of stream signalled and every byte consumed
    pub fn at_eof(&self) -> bool {
        let inner = self.lock();
        inner.eof && inner.buf.is_empty()
    }

    /// Whether the producer should currently hold off
    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Append bytes and wake the reader.
    ///
    /// Fails if end of stream was already fed. Growing past the limit marks the
    /// buffer paused.
    pub fn feed(&self, data: &[u8]) -> Result<(), StreamError> {
        {
            let mut inner = self.lock();
            if inner.eof {
                return Err(StreamError::FedAfterEof);
            }
            if data.is_empty() {
                return Ok(());
            }
            inner.buf.extend_from_slice(data);
            if inner.buf.len() > self.limit && !inner.paused {
                inner.paused = true;
                tracing::trace!(
                    "Stream buffer paused at {} bytes (limit {})",
                    inner.buf.len(),
                    self.limit
                );
            }
        }
        self.data_ready.notify_one();
        Ok(())
    }

    /// Signal end of stream. Calling it again has no effect.
    pub fn feed_eof(&self) {
        {
            let mut inner = self.lock();
            if inner.eof {
                return;
            }
            inner.eof = true;
        }
        self.data_ready.notify_one();
        self.resumed.notify_one();
    }

    /// Record a transport failure. Buffered bytes stay readable; once they are
    /// consumed every read returns the error.
    pub fn set_error(&self, err: io::Error) {
        {
            let mut inner = self.lock();
            inner.error = Some((err.kind(), err.to_string()));
            inner.eof = true;
        }
        self.data_ready.notify_one();
        self.resumed.notify_one();
    }

    /// Wait until the buffer is no longer paused (or the stream has ended)
    pub async fn wait_resumed(&self) {
        loop {
            {
                let inner = self.lock();
                if !inner.paused || inner.eof {
                    return;
                }
            }
            self.resumed.notified().await;
        }
    }

    /// Read up to `max_bytes` from the front of the buffer.
    ///
    /// Waits while the buffer is empty and the stream is still open. Returns an
    /// empty chunk at end of stream, or immediately when `max_bytes` is zero.
    pub async fn read(&self, max_bytes: usize) -> Result<Bytes, StreamError> {
        if max_bytes == 0 {
            return Ok(Bytes::new());
        }
        let _guard = self.begin_read()?;
        self.read_chunk(max_bytes).await
    }

    /// Read everything until end of stream, draining at most `limit` bytes per step
    pub async fn read_to_end(&self) -> Result<Bytes, StreamError> {
        let _guard = self.begin_read()?;
        let mut out = BytesMut::new();
        loop {
            let chunk = self.read_chunk(self.limit).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Read up to and including `separator`.
    ///
    /// # Errors
    ///
    /// * [`StreamError::LimitOverrun`] if more than `limit` bytes precede any
    ///   separator. Nothing is consumed.
    /// * [`StreamError::IncompleteRead`] if the stream ends first. The partial
    ///   bytes are returned in the error and the buffer is cleared.
    pub async fn read_until(&self, separator: &[u8]) -> Result<Bytes, StreamError> {
        if separator.is_empty() {
            return Err(StreamError::EmptySeparator);
        }
        let _guard = self.begin_read()?;
        self.read_until_inner(separator).await
    }

    /// Read one `\n`-terminated line.
    ///
    /// An over-long line is dropped from the buffer (through its newline, if
    /// already received) and reported as [`StreamError::LineTooLong`], so it
    /// cannot wedge the stream. A final unterminated line is returned as is; an
    /// empty result means end of stream.
    pub async fn read_line(&self) -> Result<Bytes, StreamError> {
        const NEWLINE: &[u8] = b"\n";

        let _guard = self.begin_read()?;
        match self.read_until_inner(NEWLINE).await {
            Ok(line) => Ok(line),
            Err(StreamError::IncompleteRead { partial }) => Ok(partial),
            Err(StreamError::LimitOverrun { consumed }) => {
                let mut inner = self.lock();
                if inner.buf.len() > consumed && inner.buf[consumed..].starts_with(NEWLINE) {
                    inner.buf.advance(consumed + NEWLINE.len());
                } else {
                    inner.buf.clear();
                }
                self.maybe_resume(&mut inner);
                Err(StreamError::LineTooLong { consumed })
            }
            Err(e) => Err(e),
        }
    }

    async fn read_chunk(&self, max_bytes: usize) -> Result<Bytes, StreamError> {
        loop {
            {
                let mut inner = self.lock();
                if !inner.buf.is_empty() {
                    let n = max_bytes.min(inner.buf.len());
                    let chunk = inner.buf.split_to(n).freeze();
                    self.maybe_resume(&mut inner);
                    return Ok(chunk);
                }
                if let Some(err) = inner.stored_error() {
                    return Err(err);
                }
                if inner.eof {
                    return Ok(Bytes::new());
                }
            }
            self.data_ready.notified().await;
        }
    }

    async fn read_until_inner(&self, separator: &[u8]) -> Result<Bytes, StreamError> {
        let seplen = separator.len();
        // Bytes before `offset` are known not to start a separator
        let mut offset = 0;

        loop {
            {
                let mut inner = self.lock();
                let buflen = inner.buf.len();

                if buflen >= offset + seplen {
                    if let Some(pos) = find(&inner.buf[offset..], separator) {
                        let isep = offset + pos;
                        if isep > self.limit {
                            return Err(StreamError::LimitOverrun { consumed: isep });
                        }
                        let chunk = inner.buf.split_to(isep + seplen).freeze();
                        self.maybe_resume(&mut inner);
                        return Ok(chunk);
                    }

                    offset = buflen + 1 - seplen;
                    if offset > self.limit {
                        return Err(StreamError::LimitOverrun { consumed: offset });
                    }
                }

                if inner.eof {
                    if inner.buf.is_empty() {
                        if let Some(err) = inner.stored_error() {
                            return Err(err);
                        }
                    }
                    let partial = inner.buf.split().freeze();
                    self.maybe_resume(&mut inner);
                    return Err(StreamError::IncompleteRead { partial });
                }

                // The tail may hold the start of a separator that only the
                // producer can complete. The overrun check above bounds growth.
                if inner.paused {
                    inner.paused = false;
                    self.resumed.notify_one();
                }
            }
            self.data_ready.notified().await;
        }
    }

    fn begin_read(&self) -> Result<ReadGuard<'_>, StreamError> {
        let mut inner = self.lock();
        if inner.reading {
            return Err(StreamError::ConcurrentRead);
        }
        inner.reading = true;
        Ok(ReadGuard { buffer: self })
    }

    fn maybe_resume(&self, inner: &mut Inner) {
        if inner.paused && inner.buf.len() <= self.limit {
            inner.paused = false;
            self.resumed.notify_one();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
