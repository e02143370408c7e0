//! Session registry
//!
//! Tracks every live [`Connection`] in registration order, assigns ids and
//! holds the active-session pointer. The active pointer only ever references an
//! `Open` session: it is cleared as soon as that session starts closing.

use sm_core::{ConnectionState, PeerAddr, RegistryError, SessionId, SessionInfo};
use tokio_util::sync::CancellationToken;

use super::connection::Connection;

/// All live sessions and the active pointer
#[derive(Debug)]
pub struct SessionRegistry {
    /// Insertion order is listing order
    sessions: Vec<Connection>,
    next_id: u32,
    active: Option<SessionId>,
    pending_output_cap: usize,
    history_len: usize,
}

impl SessionRegistry {
    /// Create an empty registry; new sessions get buffers of the given sizes
    pub fn new(pending_output_cap: usize, history_len: usize) -> Self {
        Self {
            sessions: Vec::new(),
            next_id: 0,
            active: None,
            pending_output_cap,
            history_len,
        }
    }

    /// Register a new connection in `Connecting` state and return its id.
    ///
    /// Fails once the id space is used up; ids are never handed out twice.
    pub fn register(
        &mut self,
        peer: PeerAddr,
        cancel: CancellationToken,
    ) -> Result<SessionId, RegistryError> {
        let id = SessionId::new(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or(RegistryError::IdsExhausted)?;
        self.sessions.push(Connection::new(
            id,
            peer,
            self.pending_output_cap,
            self.history_len,
            cancel,
        ));
        Ok(id)
    }

    /// Look up a session
    pub fn get(&self, id: SessionId) -> Result<&Connection, RegistryError> {
        self.sessions
            .iter()
            .find(|conn| conn.id() == id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Look up a session mutably
    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut Connection, RegistryError> {
        self.sessions
            .iter_mut()
            .find(|conn| conn.id() == id)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Remove a session, clearing the active pointer if it referenced it
    pub fn remove(&mut self, id: SessionId) -> Option<Connection> {
        let index = self.sessions.iter().position(|conn| conn.id() == id)?;
        if self.active == Some(id) {
            self.active = None;
        }
        Some(self.sessions.remove(index))
    }

    /// Snapshot of every session in registration order
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|conn| conn.info(self.active == Some(conn.id())))
            .collect()
    }

    /// Make `id` the active session. Only `Open` sessions can be selected;
    /// on failure the active pointer is unchanged.
    pub fn set_active(&mut self, id: SessionId) -> Result<(), RegistryError> {
        let conn = self.get(id)?;
        if !conn.is_open() {
            return Err(RegistryError::NotOpen {
                id,
                state: conn.state(),
            });
        }
        self.active = Some(id);
        Ok(())
    }

    /// Deselect the active session
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// The active session
    pub fn active(&self) -> Option<&Connection> {
        self.active.and_then(|id| self.get(id).ok())
    }

    /// The active session, mutably
    pub fn active_mut(&mut self) -> Option<&mut Connection> {
        let id = self.active?;
        self.get_mut(id).ok()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    /// Advance a session's lifecycle. Leaving `Open` clears the active
    /// pointer if it referenced this session.
    pub fn transition(
        &mut self,
        id: SessionId,
        next: ConnectionState,
    ) -> Result<(), RegistryError> {
        self.get_mut(id)?.transition(next)?;
        if next != ConnectionState::Open && self.active == Some(id) {
            self.active = None;
        }
        Ok(())
    }

    /// Whether `id` was ever handed out, even if since removed
    pub fn was_issued(&self, id: SessionId) -> bool {
        id.as_u32() < self.next_id
    }

    /// Ids of sessions currently `Open`
    pub fn open_ids(&self) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|conn| conn.is_open())
            .map(|conn| conn.id())
            .collect()
    }

    /// Number of tracked sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
