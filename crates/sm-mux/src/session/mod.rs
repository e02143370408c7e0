//! Session tracking

mod connection;
mod pending;
mod registry;

pub use connection::Connection;
pub use pending::{InputHistory, PendingOutput};
pub use registry::SessionRegistry;
