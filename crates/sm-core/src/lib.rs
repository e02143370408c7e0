//! sm-core: Core abstractions and configuration for shellmux
//!
//! This crate provides the shared types, error taxonomy, configuration and
//! transport traits used by the multiplexer and its binary.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ListenerError, RegistryError, SmError};
pub use types::{ConnectionState, ListenerId, ListenerInfo, PeerAddr, SessionId, SessionInfo};
