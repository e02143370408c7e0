//! Buffered duplex stream over an async transport
//!
//! `BufferedStream` pairs a [`StreamBuffer`] with a [`StreamWriter`]. A pump task
//! reads the transport into the buffer and stops requesting data whenever the
//! buffer is paused, so a fast peer cannot grow memory without bound.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::buffer::{StreamBuffer, DEFAULT_LIMIT};
use crate::error::StreamError;
use crate::writer::StreamWriter;

/// Default number of bytes requested from the transport per read
pub const DEFAULT_READ_CHUNK: usize = 8192;

/// Default bound on draining a transport during close
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Construction parameters for a [`BufferedStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    /// Buffer limit in bytes
    pub limit: usize,
    /// Bytes requested from the transport per read
    pub read_chunk: usize,
    /// How long close waits for the transport to drain
    pub drain_timeout: Duration,
    /// Optional bound on a single write+drain
    pub write_timeout: Option<Duration>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            read_chunk: DEFAULT_READ_CHUNK,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            write_timeout: None,
        }
    }
}

impl StreamOptions {
    /// Reject parameters that cannot produce a working stream
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.limit == 0 {
            return Err(StreamError::Configuration(
                "buffer limit must be a positive integer".to_string(),
            ));
        }
        if self.read_chunk == 0 {
            return Err(StreamError::Configuration(
                "read chunk size must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reader and writer over one transport
#[derive(Debug)]
pub struct BufferedStream {
    buffer: Arc<StreamBuffer>,
    writer: StreamWriter,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedStream {
    /// Wrap a duplex transport. Must be called within a Tokio runtime.
    pub fn new<T>(io: T, options: &StreamOptions) -> Result<Self, StreamError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(reader, writer, options)
    }

    /// Wrap separate read and write halves, such as stdin and stdout
    pub fn from_parts<R, W>(reader: R, writer: W, options: &StreamOptions) -> Result<Self, StreamError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        options.validate()?;

        let buffer = Arc::new(StreamBuffer::new(options.limit)?);
        let pump = tokio::spawn(pump(reader, Arc::clone(&buffer), options.read_chunk));

        Ok(Self {
            buffer,
            writer: StreamWriter::new(writer, options.drain_timeout, options.write_timeout),
            pump: Mutex::new(Some(pump)),
        })
    }

    /// The receive buffer
    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    /// See [`StreamBuffer::read`]
    pub async fn read(&self, max_bytes: usize) -> Result<Bytes, StreamError> {
        self.buffer.read(max_bytes).await
    }

    /// See [`StreamBuffer::read_to_end`]
    pub async fn read_to_end(&self) -> Result<Bytes, StreamError> {
        self.buffer.read_to_end().await
    }

    /// See [`StreamBuffer::read_until`]
    pub async fn read_until(&self, separator: &[u8]) -> Result<Bytes, StreamError> {
        self.buffer.read_until(separator).await
    }

    /// See [`StreamBuffer::read_line`]
    pub async fn read_line(&self) -> Result<Bytes, StreamError> {
        self.buffer.read_line().await
    }

    /// Write and drain
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        self.writer.write(data).await
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.writer.is_closing()
    }

    /// Close both directions. Idempotent and never fails.
    ///
    /// Any pending read is released with end of stream.
    pub async fn close(&self) {
        self.writer.close().await;
        self.stop_pump();
        self.buffer.feed_eof();
    }

    fn stop_pump(&self) {
        let handle = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

/// Move transport bytes into the buffer, honouring backpressure
async fn pump<R>(mut reader: R, buffer: Arc<StreamBuffer>, read_chunk: usize)
where
    R: AsyncRead + Unpin,
{
    let mut scratch = vec![0u8; read_chunk];

    loop {
        buffer.wait_resumed().await;
        if buffer.is_eof() {
            break;
        }

        match reader.read(&mut scratch).await {
            Ok(0) => {
                buffer.feed_eof();
                break;
            }
            Ok(n) => {
                if buffer.feed(&scratch[..n]).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("Transport read failed: {}", e);
                buffer.set_error(e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_options_reject_zero_limit() {
        let options = StreamOptions {
            limit: 0,
            ..StreamOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(StreamError::Configuration(_))
        ));
    }

    #[test]
    fn test_options_reject_zero_chunk() {
        let options = StreamOptions {
            read_chunk: 0,
            ..StreamOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[tokio::test]
    async fn test_reads_transport_bytes() {
        let (local, mut remote) = tokio::io::duplex(256);
        let stream = BufferedStream::new(local, &StreamOptions::default()).unwrap();

        remote.write_all(b"line one\nline two\n").await.unwrap();
        drop(remote);

        assert_eq!(&stream.read_line().await.unwrap()[..], b"line one\n");
        assert_eq!(&stream.read_line().await.unwrap()[..], b"line two\n");
        assert!(stream.read_line().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pump_stops_while_paused() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let options = StreamOptions {
            limit: 8,
            read_chunk: 16,
            ..StreamOptions::default()
        };
        let stream = BufferedStream::new(local, &options).unwrap();

        remote.write_all(&[b'x'; 64]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // One chunk past the limit, then the pump waits
        assert!(stream.buffer().is_paused());
        assert_eq!(stream.buffer().len(), 16);

        let drained = stream.read(16).await.unwrap();
        assert_eq!(drained.len(), 16);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stream.buffer().len(), 16);
    }

    #[tokio::test]
    async fn test_read_until_completes_separator_past_limit() {
        let (local, mut remote) = tokio::io::duplex(256);
        let options = StreamOptions {
            limit: 8,
            read_chunk: 9,
            ..StreamOptions::default()
        };
        let stream = BufferedStream::new(local, &options).unwrap();

        remote.write_all(b"abcdefgEN").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stream.buffer().is_paused());
        remote.write_all(b"D").await.unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(1), stream.read_until(b"END"))
            .await
            .expect("read_until stalled behind a paused pump")
            .unwrap();
        assert_eq!(&chunk[..], b"abcdefgEND");
    }

    #[tokio::test]
    async fn test_close_releases_pending_reader() {
        let (local, _remote) = tokio::io::duplex(64);
        let stream = Arc::new(BufferedStream::new(local, &StreamOptions::default()).unwrap());

        let reader = {
            let stream = Arc::clone(&stream);
            tokio::spawn(async move { stream.read(8).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        stream.close().await;
        stream.close().await;

        let chunk = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader still blocked after close")
            .unwrap()
            .unwrap();
        assert!(chunk.is_empty());
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn test_write_reaches_transport() {
        let (local, remote) = tokio::io::duplex(64);
        let stream = BufferedStream::new(local, &StreamOptions::default()).unwrap();
        let peer = BufferedStream::new(remote, &StreamOptions::default()).unwrap();

        stream.write(b"hello\n").await.unwrap();
        assert_eq!(&peer.read_line().await.unwrap()[..], b"hello\n");
    }
}
