//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Identifier of a session, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Identifier of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u32);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Remote endpoint of a connection, captured at connect time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    /// Create a new peer address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connection lifecycle state
///
/// `Connecting -> Open -> Closing -> Closed`; no state is ever skipped and
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Transport accepted, not yet attached
    Connecting,
    /// Ready for I/O
    Open,
    /// Shutdown in progress
    Closing,
    /// Resources released
    Closed,
}

impl ConnectionState {
    /// The only state this one may move to
    pub fn successor(self) -> Option<ConnectionState> {
        match self {
            ConnectionState::Connecting => Some(ConnectionState::Open),
            ConnectionState::Open => Some(ConnectionState::Closing),
            ConnectionState::Closing => Some(ConnectionState::Closed),
            ConnectionState::Closed => None,
        }
    }

    /// Whether moving to `next` is allowed
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        self.successor() == Some(next)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Snapshot of one session, as listed to the operator or a dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: PeerAddr,
    pub state: ConnectionState,
    /// Whether this is the active session
    pub active: bool,
    /// Bytes waiting to be shown when the operator switches here
    pub pending_bytes: usize,
}

/// Snapshot of one listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerInfo {
    pub id: ListenerId,
    /// Bound local address
    pub address: PeerAddr,
    pub serving: bool,
    /// Whether accepted sockets pass through an encrypting acceptor
    pub encrypted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions_are_linear() {
        use ConnectionState::*;

        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));

        assert!(!Connecting.can_transition_to(Closing));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert_eq!(Closed.successor(), None);
    }

    #[test]
    fn test_peer_addr_display() {
        let v4: SocketAddr = "10.0.0.5:4444".parse().unwrap();
        assert_eq!(PeerAddr::from(v4).to_string(), "10.0.0.5:4444");

        let v6: SocketAddr = "[::1]:9001".parse().unwrap();
        assert_eq!(PeerAddr::from(v6).to_string(), "[::1]:9001");
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Open), "open");
        assert_eq!(format!("{}", ConnectionState::Closing), "closing");
    }
}
