//! Operator terminal binding

use std::sync::Arc;

use sm_stream::{BufferedStream, Duplex, StreamError, StreamOptions};

/// The process's stdin and stdout as the operator stream.
///
/// Lines longer than `limit` are discarded by the operator loop.
pub fn stdio(limit: usize) -> Result<Arc<dyn Duplex>, StreamError> {
    let options = StreamOptions {
        limit,
        ..StreamOptions::default()
    };
    let stream = BufferedStream::from_parts(tokio::io::stdin(), tokio::io::stdout(), &options)?;
    Ok(Arc::new(stream))
}
