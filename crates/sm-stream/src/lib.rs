//! sm-stream: Flow-controlled buffered streams for shellmux
//!
//! This crate provides the byte-level buffering used for every session and for
//! the operator terminal: a bounded receive buffer with backpressure and
//! delimiter-based reads, a pass-through writer, and the [`Duplex`] trait the
//! multiplexer is written against.

pub mod buffer;
pub mod duplex;
pub mod error;
pub mod stream;
pub mod writer;

pub use buffer::{StreamBuffer, DEFAULT_LIMIT};
pub use duplex::Duplex;
pub use error::StreamError;
pub use stream::{BufferedStream, StreamOptions, DEFAULT_DRAIN_TIMEOUT, DEFAULT_READ_CHUNK};
pub use writer::StreamWriter;
