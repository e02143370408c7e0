//! Core trait definitions

mod transport;

pub use transport::{Acceptor, BoxedIo, PlainAcceptor, TransportIo};
