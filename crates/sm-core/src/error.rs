//! Core error types for shellmux

use sm_stream::StreamError;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{ConnectionState, ListenerId, SessionId};

/// Top-level error type for the shellmux crates
#[derive(Error, Debug)]
pub enum SmError {
    /// Stream error
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Session registry error
    #[error("Session error: {0}")]
    Registry(#[from] RegistryError),

    /// Listener error
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The multiplexer is shutting down and accepts no new work
    #[error("Multiplexer is shutting down")]
    ShuttingDown,

    /// The operator loop is already running
    #[error("Multiplexer is already running")]
    AlreadyRunning,
}

/// Session lookup and lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No session with this id
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// Session exists but cannot take input
    #[error("session {id} is {state}, not open")]
    NotOpen { id: SessionId, state: ConnectionState },

    /// Lifecycle transition out of order
    #[error("session {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: SessionId,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Input arrived with no active session selected
    #[error("no active session")]
    NoActiveSession,

    /// Every session id has been handed out
    #[error("session ids exhausted")]
    IdsExhausted,
}

/// Listener control errors
#[derive(Error, Debug)]
pub enum ListenerError {
    /// No listener with this id
    #[error("listener {0} not found")]
    NotFound(ListenerId),

    /// start called twice
    #[error("listener {0} is already serving")]
    AlreadyServing(ListenerId),

    /// Socket could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Outbound connection failed
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<StreamError> for ConfigError {
    fn from(err: StreamError) -> Self {
        ConfigError::Invalid(err.to_string())
    }
}
