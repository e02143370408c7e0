//! The multiplexer
//!
//! Owns the operator stream and the [`SessionRegistry`]. Each open session has
//! an inbound relay task that shows its output live when it is active and
//! keeps it as pending output otherwise; a single operator loop turns typed
//! lines into commands or forwards them to the active session.
//!
//! Everything bound for the operator goes through one ordered channel drained
//! by a single writer task. Producers enqueue while holding the registry lock,
//! so a session's catch-up backlog is always queued ahead of any live output
//! it produces after the switch.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sm_core::config::MuxConfig;
use sm_core::{ConnectionState, PeerAddr, RegistryError, SessionId, SessionInfo, SmError};
use sm_stream::{BufferedStream, Duplex, StreamError, StreamOptions};

use crate::command::{Command, CommandInterpreter};
use crate::pty::PtyUpgrade;
use crate::session::SessionRegistry;

/// Prefix of every line the multiplexer itself writes to the operator
pub const NOTICE_PREFIX: &str = "[shellmux] ";

/// Pause between PTY upgrade commands so the spawned shell is reading
const UPGRADE_STEP_DELAY: Duration = Duration::from_millis(10);

/// Handle to the multiplexer; cheap to clone
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

struct Shared {
    registry: Mutex<SessionRegistry>,
    operator: Arc<dyn Duplex>,
    interpreter: CommandInterpreter,
    output_tx: mpsc::UnboundedSender<Bytes>,
    /// Taken by `run`
    output_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    stream_options: StreamOptions,
    auto_upgrade: Mutex<Option<PtyUpgrade>>,
    /// Parent of every relay task's token
    cancel: CancellationToken,
    shutting_down: AtomicBool,
}

impl Multiplexer {
    /// Create a multiplexer driving `operator`
    pub fn new(operator: Arc<dyn Duplex>, config: &MuxConfig) -> Result<Self, SmError> {
        config.validate()?;
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(SessionRegistry::new(
                    config.pending_output_cap,
                    config.history_len,
                )),
                operator,
                interpreter: CommandInterpreter::new(),
                output_tx,
                output_rx: Mutex::new(Some(output_rx)),
                stream_options: config.stream.to_options(),
                auto_upgrade: Mutex::new(config.auto_upgrade.as_ref().map(PtyUpgrade::from_config)),
                cancel: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Replace the upgrade sent to every new session
    pub fn set_auto_upgrade(&self, upgrade: Option<PtyUpgrade>) {
        *lock(&self.shared.auto_upgrade) = upgrade;
    }

    /// Adopt an established channel as a new session.
    ///
    /// The session becomes active if none is. Must be called within a Tokio
    /// runtime.
    pub fn on_new_connection<T>(&self, io: T, peer: PeerAddr) -> Result<SessionId, SmError>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stream: Arc<dyn Duplex> =
            Arc::new(BufferedStream::new(io, &self.shared.stream_options)?);
        self.attach(stream, peer)
    }

    fn attach(&self, stream: Arc<dyn Duplex>, peer: PeerAddr) -> Result<SessionId, SmError> {
        let shared = &self.shared;
        let cancel = shared.cancel.child_token();

        let id = {
            let mut registry = shared.registry();
            if shared.shutting_down.load(Ordering::SeqCst) {
                return Err(SmError::ShuttingDown);
            }

            let id = registry.register(peer.clone(), cancel.clone())?;
            registry.get_mut(id)?.attach(Arc::clone(&stream))?;

            let became_active = registry.active_id().is_none();
            if became_active {
                registry.set_active(id)?;
            }
            shared.notice(format_args!(
                "session {} opened from {}{}",
                id,
                peer,
                if became_active { " (active)" } else { "" }
            ));
            id
        };

        tracing::info!("Session {} opened from {}", id, peer);
        tokio::spawn(Arc::clone(shared).relay_inbound(id, Arc::clone(&stream), cancel));

        if let Some(upgrade) = lock(&shared.auto_upgrade).clone() {
            tokio::spawn(async move {
                if let Err(e) = write_upgrade(stream.as_ref(), &upgrade).await {
                    tracing::warn!("PTY upgrade of session {} failed: {}", id, e);
                }
            });
        }

        Ok(id)
    }

    /// Make `id` the active session, first showing what it produced while
    /// inactive
    pub fn switch_active(&self, id: SessionId) -> Result<(), RegistryError> {
        let mut registry = self.shared.registry();
        registry.set_active(id)?;

        let conn = registry.get_mut(id)?;
        let dropped = conn.pending().dropped();
        let backlog = conn.pending_mut().take();
        if dropped > 0 {
            self.shared.notice(format_args!(
                "session {}: {} older bytes were discarded",
                id, dropped
            ));
        }
        if !backlog.is_empty() {
            self.shared.emit(backlog);
        }
        tracing::debug!("Active session is now {}", id);
        Ok(())
    }

    /// Deselect the active session without closing it
    pub fn detach(&self) {
        self.shared.registry().clear_active();
    }

    /// The active session
    pub fn active(&self) -> Option<SessionId> {
        self.shared.registry().active_id()
    }

    /// Snapshot of all sessions in registration order
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.shared.registry().list()
    }

    /// Lines forwarded to a session, oldest first
    pub fn history(&self, id: SessionId) -> Result<Vec<Bytes>, RegistryError> {
        Ok(self.shared.registry().get(id)?.history().to_vec())
    }

    /// Start closing a session in the background.
    ///
    /// A session that already closed is not an error; an id that was never
    /// issued is.
    pub fn request_close(&self, id: SessionId) -> Result<(), RegistryError> {
        self.shared.check_closable(id)?;
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.close_connection(id).await });
        Ok(())
    }

    /// Close a session and wait for it to be released
    pub async fn close_session(&self, id: SessionId) -> Result<(), RegistryError> {
        self.shared.check_closable(id)?;
        self.shared.close_connection(id).await;
        Ok(())
    }

    /// Write raw bytes to a session
    pub async fn send(&self, id: SessionId, data: &[u8]) -> Result<(), SmError> {
        let stream = self.shared.open_stream(id)?;
        stream.write(data).await?;
        Ok(())
    }

    /// Send the PTY upgrade sequence to a session
    pub async fn upgrade_pty(&self, id: SessionId, upgrade: &PtyUpgrade) -> Result<(), SmError> {
        let stream = self.shared.open_stream(id)?;
        write_upgrade(stream.as_ref(), upgrade).await?;
        tracing::info!("Sent PTY upgrade to session {}", id);
        Ok(())
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    /// Run the operator loop until `exit`/`quit`, operator end of input, or
    /// [`shutdown`](Self::shutdown). Shuts everything down before returning.
    pub async fn run(&self) -> Result<(), SmError> {
        let output_rx = lock(&self.shared.output_rx)
            .take()
            .ok_or(SmError::AlreadyRunning)?;
        let writer = tokio::spawn(write_output(
            Arc::clone(&self.shared.operator),
            output_rx,
            self.shared.cancel.clone(),
        ));

        loop {
            let line = tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                line = self.shared.operator.read_line() => line,
            };

            match line {
                Ok(line) if line.is_empty() => {
                    tracing::info!("Operator input closed");
                    break;
                }
                Ok(line) => {
                    if self.handle_line(&line).await.is_break() {
                        break;
                    }
                }
                Err(StreamError::LineTooLong { consumed }) => {
                    self.shared.notice(format_args!(
                        "input line too long, discarded {} bytes",
                        consumed
                    ));
                }
                Err(e) => {
                    tracing::error!("Operator input failed: {}", e);
                    break;
                }
            }
        }

        self.shutdown().await;
        if let Err(e) = writer.await {
            tracing::warn!("Operator output task failed: {}", e);
        }
        self.shared.operator.close().await;
        Ok(())
    }

    /// Act on one operator line
    pub async fn handle_line(&self, line: &[u8]) -> ControlFlow<()> {
        match self.shared.interpreter.parse(line) {
            Command::SwitchSession(id) => {
                if let Err(e) = self.switch_active(id) {
                    self.shared.notice(e);
                }
            }
            Command::ListSessions => {
                let listing = render_listing(&self.list_sessions());
                self.shared.emit(Bytes::from(listing));
            }
            Command::CloseSession(id) => {
                if let Err(e) = self.request_close(id) {
                    self.shared.notice(e);
                }
            }
            Command::Quit => return ControlFlow::Break(()),
            Command::Forward(data) => self.forward(data).await,
        }
        ControlFlow::Continue(())
    }

    async fn forward(&self, data: Bytes) {
        let target = {
            let mut registry = self.shared.registry();
            registry.active_mut().and_then(|conn| {
                conn.history_mut().record(data.clone());
                conn.stream().map(|stream| (conn.id(), Arc::clone(stream)))
            })
        };

        let Some((id, stream)) = target else {
            self.shared.notice(RegistryError::NoActiveSession);
            return;
        };

        if let Err(e) = stream.write(&data).await {
            tracing::warn!("Write to session {} failed: {}", id, e);
            self.shared
                .notice(format_args!("write to session {} failed: {}", id, e));
            if let Err(e) = self.request_close(id) {
                tracing::debug!("Session {} already gone: {}", id, e);
            }
        }
    }

    /// Close every open session, then stop all tasks. Idempotent.
    pub async fn shutdown(&self) {
        let ids = {
            let registry = self.shared.registry();
            if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
                return;
            }
            registry.open_ids()
        };

        tracing::info!("Shutting down, closing {} session(s)", ids.len());
        join_all(ids.into_iter().map(|id| self.shared.close_connection(id))).await;
        self.shared.cancel.cancel();
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("sessions", &self.shared.registry().len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        lock(&self.registry)
    }

    /// Queue bytes for the operator
    fn emit(&self, data: Bytes) {
        if self.output_tx.send(data).is_err() {
            tracing::debug!("Operator output closed, dropping bytes");
        }
    }

    /// Queue a one-line message of our own for the operator
    fn notice(&self, message: impl fmt::Display) {
        self.emit(Bytes::from(format!("{}{}\n", NOTICE_PREFIX, message)));
    }

    fn check_closable(&self, id: SessionId) -> Result<(), RegistryError> {
        let registry = self.registry();
        match registry.get(id) {
            Ok(_) => Ok(()),
            Err(_) if registry.was_issued(id) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn open_stream(&self, id: SessionId) -> Result<Arc<dyn Duplex>, RegistryError> {
        let registry = self.registry();
        let conn = registry.get(id)?;
        match conn.stream() {
            Some(stream) if conn.is_open() => Ok(Arc::clone(stream)),
            _ => Err(RegistryError::NotOpen {
                id,
                state: conn.state(),
            }),
        }
    }

    /// Live to the operator if active, pending otherwise
    fn route_inbound(&self, id: SessionId, chunk: Bytes) {
        let mut registry = self.registry();
        if registry.active_id() == Some(id) {
            self.emit(chunk);
        } else if let Ok(conn) = registry.get_mut(id) {
            conn.pending_mut().push(&chunk);
        }
    }

    async fn relay_inbound(
        self: Arc<Self>,
        id: SessionId,
        stream: Arc<dyn Duplex>,
        cancel: CancellationToken,
    ) {
        let read_chunk = self.stream_options.read_chunk;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = stream.read(read_chunk) => result,
            };

            match result {
                Ok(chunk) if chunk.is_empty() => {
                    tracing::debug!("Session {} reached end of stream", id);
                    break;
                }
                Ok(chunk) => self.route_inbound(id, chunk),
                Err(e) if e.is_data_shape() => {
                    tracing::debug!("Session {} sent unreadable data: {}", id, e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Session {} read failed: {}", id, e);
                    break;
                }
            }
        }

        self.close_connection(id).await;
    }

    /// Drive a session through `Closing` to `Closed` and release it.
    ///
    /// Only the caller that moves it out of `Open` does the work; later calls
    /// return immediately.
    async fn close_connection(&self, id: SessionId) {
        let stream = {
            let mut registry = self.registry();
            let stream = match registry.get(id) {
                Ok(conn) if conn.is_open() => {
                    conn.cancel_token().cancel();
                    conn.stream().cloned()
                }
                _ => return,
            };
            if let Err(e) = registry.transition(id, ConnectionState::Closing) {
                tracing::warn!("{}", e);
                return;
            }
            stream
        };

        if let Some(stream) = stream {
            stream.close().await;
        }

        {
            let mut registry = self.registry();
            if let Err(e) = registry.transition(id, ConnectionState::Closed) {
                tracing::warn!("{}", e);
            }
            registry.remove(id);
            self.notice(format_args!("session {} closed", id));
        }
        tracing::info!("Session {} closed", id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn write_upgrade(stream: &dyn Duplex, upgrade: &PtyUpgrade) -> Result<(), StreamError> {
    for command in upgrade.commands() {
        stream.write(&command).await?;
        tokio::time::sleep(UPGRADE_STEP_DELAY).await;
    }
    Ok(())
}

/// Single writer for everything the operator sees. Drains what is queued once
/// cancelled; a failed write stops the multiplexer.
async fn write_output(
    operator: Arc<dyn Duplex>,
    mut output_rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            biased;
            data = output_rx.recv() => data,
            _ = cancel.cancelled() => {
                while let Ok(data) = output_rx.try_recv() {
                    if operator.write(&data).await.is_err() {
                        break;
                    }
                }
                return;
            }
        };

        let Some(data) = data else { return };
        if let Err(e) = operator.write(&data).await {
            tracing::error!("Operator output failed: {}", e);
            cancel.cancel();
            return;
        }
    }
}

/// Operator-facing session table
fn render_listing(sessions: &[SessionInfo]) -> String {
    if sessions.is_empty() {
        return format!("{}no sessions\n", NOTICE_PREFIX);
    }

    let mut out = format!("{}{} session(s)\n", NOTICE_PREFIX, sessions.len());
    for info in sessions {
        let marker = if info.active { '*' } else { ' ' };
        out.push_str(&format!(
            "{} {:>4}  {:<24} {}",
            marker,
            info.id.as_u32(),
            info.peer.to_string(),
            info.state
        ));
        if info.pending_bytes > 0 {
            out.push_str(&format!("  ({} bytes pending)", info.pending_bytes));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u32, active: bool, pending_bytes: usize) -> SessionInfo {
        SessionInfo {
            id: SessionId::new(id),
            peer: PeerAddr::new("10.0.0.1", 4000 + id as u16),
            state: ConnectionState::Open,
            active,
            pending_bytes,
        }
    }

    #[test]
    fn test_render_empty_listing() {
        assert_eq!(render_listing(&[]), "[shellmux] no sessions\n");
    }

    #[test]
    fn test_render_listing_marks_active_and_pending() {
        let listing = render_listing(&[info(0, true, 0), info(1, false, 5)]);
        let lines: Vec<&str> = listing.lines().collect();

        assert_eq!(lines[0], "[shellmux] 2 session(s)");
        assert!(lines[1].starts_with("*    0  10.0.0.1:4000"));
        assert!(lines[1].ends_with("open"));
        assert!(lines[2].starts_with("     1  10.0.0.1:4001"));
        assert!(lines[2].ends_with("(5 bytes pending)"));
    }
}
