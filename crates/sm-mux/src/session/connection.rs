//! One remote session and its lifecycle

use std::sync::Arc;

use sm_core::{ConnectionState, PeerAddr, RegistryError, SessionId, SessionInfo};
use sm_stream::Duplex;
use tokio_util::sync::CancellationToken;

use super::pending::{InputHistory, PendingOutput};

/// A live remote connection
///
/// Owned by the [`SessionRegistry`](super::SessionRegistry); all mutation goes
/// through it so the active-session invariant is kept in one place.
pub struct Connection {
    id: SessionId,
    peer: PeerAddr,
    state: ConnectionState,
    /// Set once the transport is attached
    stream: Option<Arc<dyn Duplex>>,
    pending: PendingOutput,
    history: InputHistory,
    /// Cancels the inbound relay task
    cancel: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        id: SessionId,
        peer: PeerAddr,
        pending_output_cap: usize,
        history_len: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            state: ConnectionState::Connecting,
            stream: None,
            pending: PendingOutput::new(pending_output_cap),
            history: InputHistory::new(history_len),
            cancel,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The session stream, present from `Open` onwards
    pub fn stream(&self) -> Option<&Arc<dyn Duplex>> {
        self.stream.as_ref()
    }

    pub fn pending(&self) -> &PendingOutput {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingOutput {
        &mut self.pending
    }

    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut InputHistory {
        &mut self.history
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach the transport, moving `Connecting -> Open`
    pub(crate) fn attach(&mut self, stream: Arc<dyn Duplex>) -> Result<(), RegistryError> {
        self.transition(ConnectionState::Open)?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Move to the next lifecycle state; out-of-order moves are rejected
    pub(crate) fn transition(&mut self, next: ConnectionState) -> Result<(), RegistryError> {
        if !self.state.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        tracing::debug!("Session {}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Listing snapshot
    pub fn info(&self, active: bool) -> SessionInfo {
        SessionInfo {
            id: self.id,
            peer: self.peer.clone(),
            state: self.state,
            active,
            pending_bytes: self.pending.len(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection::new(
            SessionId::new(7),
            PeerAddr::new("10.0.0.9", 4444),
            64,
            8,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_new_connection_is_connecting() {
        let conn = connection();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.stream().is_none());
        assert!(!conn.is_open());
    }

    #[test]
    fn test_lifecycle_runs_in_order() {
        let mut conn = connection();
        conn.transition(ConnectionState::Open).unwrap();
        conn.transition(ConnectionState::Closing).unwrap();
        conn.transition(ConnectionState::Closed).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let mut conn = connection();
        let err = conn.transition(ConnectionState::Closing).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidTransition {
                id: SessionId::new(7),
                from: ConnectionState::Connecting,
                to: ConnectionState::Closing,
            }
        );
        assert_eq!(conn.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut conn = connection();
        conn.transition(ConnectionState::Open).unwrap();
        conn.transition(ConnectionState::Closing).unwrap();
        conn.transition(ConnectionState::Closed).unwrap();
        assert!(conn.transition(ConnectionState::Open).is_err());
    }

    #[test]
    fn test_info_reports_pending_bytes() {
        let mut conn = connection();
        conn.pending_mut().push(b"missed output");
        let info = conn.info(false);
        assert_eq!(info.pending_bytes, 13);
        assert_eq!(info.peer.to_string(), "10.0.0.9:4444");
        assert!(!info.active);
    }
}
