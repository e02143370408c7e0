//! Capability interface shared by operator and session streams

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StreamError;
use crate::stream::BufferedStream;

/// A byte stream the multiplexer can read from, write to and close.
///
/// Implemented by [`BufferedStream`]; the multiplexer depends only on this
/// trait, so a terminal, a socket or a test harness are interchangeable.
#[async_trait]
pub trait Duplex: Send + Sync {
    /// Read up to `max_bytes`; empty at end of stream
    async fn read(&self, max_bytes: usize) -> Result<Bytes, StreamError>;

    /// Read one newline-terminated line; empty at end of stream
    async fn read_line(&self) -> Result<Bytes, StreamError>;

    /// Write and drain
    async fn write(&self, data: &[u8]) -> Result<(), StreamError>;

    /// Close; idempotent and infallible
    async fn close(&self);
}

#[async_trait]
impl Duplex for BufferedStream {
    async fn read(&self, max_bytes: usize) -> Result<Bytes, StreamError> {
        BufferedStream::read(self, max_bytes).await
    }

    async fn read_line(&self) -> Result<Bytes, StreamError> {
        BufferedStream::read_line(self).await
    }

    async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        BufferedStream::write(self, data).await
    }

    async fn close(&self) {
        BufferedStream::close(self).await
    }
}
