//! Write half of a buffered stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::StreamError;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pass-through writer with an idempotent, infallible close
pub struct StreamWriter {
    inner: Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
    drain_timeout: Duration,
    write_timeout: Option<Duration>,
}

impl StreamWriter {
    /// Wrap a transport writer
    pub fn new<W>(writer: W, drain_timeout: Duration, write_timeout: Option<Duration>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(writer))),
            closed: AtomicBool::new(false),
            drain_timeout,
            write_timeout,
        }
    }

    /// Whether `close` has been called
    pub fn is_closing(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write all of `data` and drain it to the transport
    pub async fn write(&self, data: &[u8]) -> Result<(), StreamError> {
        if self.is_closing() {
            return Err(StreamError::Closed);
        }

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(StreamError::Closed)?;

        let write = async {
            writer.write_all(data).await?;
            writer.flush().await
        };

        match self.write_timeout {
            Some(limit) => tokio::time::timeout(limit, write).await.map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "write did not drain in time")
            })??,
            None => write.await?,
        }

        Ok(())
    }

    /// Shut the transport down.
    ///
    /// Safe to call any number of times. A peer that does not drain within the
    /// configured timeout is abandoned.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let taken = match tokio::time::timeout(self.drain_timeout, self.inner.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::debug!("Writer busy past drain timeout, abandoning shutdown");
                return;
            }
        };

        if let Some(mut writer) = taken {
            match tokio::time::timeout(self.drain_timeout, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Error shutting down writer: {}", e),
                Err(_) => tracing::debug!("Writer shutdown timed out"),
            }
        }
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("closed", &self.is_closing())
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_passes_through() {
        let (local, mut remote) = tokio::io::duplex(64);
        let writer = StreamWriter::new(local, Duration::from_secs(1), None);

        writer.write(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (local, mut remote) = tokio::io::duplex(64);
        let writer = StreamWriter::new(local, Duration::from_secs(1), None);

        writer.close().await;
        writer.close().await;
        assert!(writer.is_closing());

        let mut buf = Vec::new();
        assert_eq!(remote.read_to_end(&mut buf).await.unwrap(), 0);
        assert!(matches!(writer.write(b"x").await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn test_write_times_out_when_peer_stalls() {
        let (local, _remote) = tokio::io::duplex(4);
        let writer = StreamWriter::new(
            local,
            Duration::from_millis(50),
            Some(Duration::from_millis(50)),
        );

        match writer.write(b"more than four bytes").await {
            Err(StreamError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {:?}", other),
        }
        writer.close().await;
    }
}
