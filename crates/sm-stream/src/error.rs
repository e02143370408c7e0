//! Stream error types

use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while buffering or reading a stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// Bad construction parameters
    #[error("Invalid stream configuration: {0}")]
    Configuration(String),

    /// Data was fed after the end of the stream was signalled
    #[error("feed called after end of stream")]
    FedAfterEof,

    /// A delimiter-seeking read was given an empty separator
    #[error("Separator must be at least one byte long")]
    EmptySeparator,

    /// Two reads were attempted on the same stream at once
    #[error("Another read is already waiting on this stream")]
    ConcurrentRead,

    /// No separator within the configured limit; nothing was consumed
    #[error("Separator not found within limit, {consumed} bytes buffered")]
    LimitOverrun { consumed: usize },

    /// End of stream reached before a separator was found
    #[error("Incomplete read: stream ended after {} bytes without a separator", partial.len())]
    IncompleteRead { partial: Bytes },

    /// A line exceeded the limit and was discarded
    #[error("Line too long: {consumed} bytes without a newline")]
    LineTooLong { consumed: usize },

    /// Write attempted on a closed stream
    #[error("Stream is closed")]
    Closed,

    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether this error came from the shape of untrusted peer data
    /// rather than from misuse or a failed transport.
    pub fn is_data_shape(&self) -> bool {
        matches!(
            self,
            StreamError::LimitOverrun { .. }
                | StreamError::IncompleteRead { .. }
                | StreamError::LineTooLong { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_read_reports_partial_length() {
        let err = StreamError::IncompleteRead {
            partial: Bytes::from_static(b"abc"),
        };
        assert!(err.to_string().contains("3 bytes"));
        assert!(err.is_data_shape());
    }

    #[test]
    fn test_misuse_is_not_data_shape() {
        assert!(!StreamError::ConcurrentRead.is_data_shape());
        assert!(!StreamError::Closed.is_data_shape());
    }
}
