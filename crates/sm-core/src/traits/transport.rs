//! Transport provider traits
//!
//! An [`Acceptor`] turns a freshly accepted TCP socket into the duplex byte
//! channel a session runs over. TLS is provided by injecting an acceptor that
//! performs the handshake; the multiplexer never sees the difference.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any duplex byte channel a session can run over
pub trait TransportIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed transport channel
pub type BoxedIo = Box<dyn TransportIo>;

/// Completes any handshake on an accepted socket
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Turn an accepted socket into a session channel
    async fn accept(&self, socket: TcpStream) -> std::io::Result<BoxedIo>;

    /// Whether the channel is encrypted
    fn is_encrypted(&self) -> bool {
        false
    }
}

/// Passes sockets through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainAcceptor;

#[async_trait]
impl Acceptor for PlainAcceptor {
    async fn accept(&self, socket: TcpStream) -> std::io::Result<BoxedIo> {
        socket.set_nodelay(true)?;
        Ok(Box::new(socket))
    }
}
