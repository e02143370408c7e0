//! TCP listeners feeding the multiplexer
//!
//! A listener is created (bound) and started (accepting) separately so a
//! control surface can prepare listeners before any shell calls back. Each
//! accepted socket passes through the listener's [`Acceptor`] before it
//! becomes a session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sm_core::traits::{Acceptor, PlainAcceptor};
use sm_core::{ListenerError, ListenerId, ListenerInfo, PeerAddr, SessionId, SmError};

use crate::multiplexer::Multiplexer;

/// Pending connection queue length
const BACKLOG: u32 = 1024;

struct ListenerEntry {
    address: SocketAddr,
    acceptor: Arc<dyn Acceptor>,
    /// Present until the listener is started
    socket: Option<TcpListener>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

/// Creates, starts and stops listeners
pub struct ListenerManager {
    mux: Multiplexer,
    listeners: DashMap<ListenerId, ListenerEntry>,
    next_id: AtomicU32,
    /// Parent of every accept loop's token
    cancel: CancellationToken,
}

impl ListenerManager {
    pub fn new(mux: Multiplexer) -> Self {
        Self {
            mux,
            listeners: DashMap::new(),
            next_id: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Bind a listening socket without accepting yet.
    ///
    /// Without an acceptor sockets are used as they are.
    pub async fn create_listener(
        &self,
        host: &str,
        port: u16,
        acceptor: Option<Arc<dyn Acceptor>>,
    ) -> Result<ListenerId, ListenerError> {
        let address = format!("{}:{}", host, port);
        let bind_error = |source: std::io::Error| ListenerError::Bind {
            address: address.clone(),
            source,
        };

        let addr = lookup_host(address.as_str())
            .await
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "no address resolved",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        let socket = socket.map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(BACKLOG).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.insert(
            id,
            ListenerEntry {
                address: local_addr,
                acceptor: acceptor.unwrap_or_else(|| Arc::new(PlainAcceptor)),
                socket: Some(listener),
                task: None,
                cancel: self.cancel.child_token(),
            },
        );

        tracing::info!("Listener {} bound to {}", id, local_addr);
        Ok(id)
    }

    /// Start accepting connections
    pub fn start_listener(&self, id: ListenerId) -> Result<(), ListenerError> {
        let mut entry = self
            .listeners
            .get_mut(&id)
            .ok_or(ListenerError::NotFound(id))?;
        let socket = entry
            .socket
            .take()
            .ok_or(ListenerError::AlreadyServing(id))?;

        let task = tokio::spawn(accept_loop(
            id,
            socket,
            Arc::clone(&entry.acceptor),
            self.mux.clone(),
            entry.cancel.clone(),
        ));
        entry.task = Some(task);

        tracing::info!("Listener {} serving on {}", id, entry.address);
        Ok(())
    }

    /// Stop accepting and forget the listener. Sessions it produced stay open.
    pub fn stop_listener(&self, id: ListenerId) -> Result<(), ListenerError> {
        let (_, entry) = self
            .listeners
            .remove(&id)
            .ok_or(ListenerError::NotFound(id))?;

        entry.cancel.cancel();
        if let Some(task) = entry.task {
            task.abort();
        }
        tracing::info!("Listener {} on {} stopped", id, entry.address);
        Ok(())
    }

    /// All listeners, by id
    pub fn list_listeners(&self) -> Vec<ListenerInfo> {
        let mut listeners: Vec<ListenerInfo> = self
            .listeners
            .iter()
            .map(|entry| ListenerInfo {
                id: *entry.key(),
                address: PeerAddr::from(entry.address),
                serving: entry.task.is_some(),
                encrypted: entry.acceptor.is_encrypted(),
            })
            .collect();
        listeners.sort_by_key(|info| info.id);
        listeners
    }

    /// Dial a bind shell and adopt it as a session
    pub async fn connect_outbound(&self, host: &str, port: u16) -> Result<SessionId, SmError> {
        let address = format!("{}:{}", host, port);
        let socket = TcpStream::connect(address.as_str())
            .await
            .map_err(|source| ListenerError::Connect {
                address: address.clone(),
                source,
            })?;
        socket.set_nodelay(true)?;
        let peer = PeerAddr::from(socket.peer_addr()?);

        tracing::info!("Connected to {}", peer);
        self.mux.on_new_connection(socket, peer)
    }

    /// Stop every listener
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let ids: Vec<ListenerId> = self.listeners.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Err(e) = self.stop_listener(id) {
                tracing::debug!("{}", e);
            }
        }
    }
}

impl std::fmt::Debug for ListenerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerManager")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

async fn accept_loop(
    id: ListenerId,
    listener: TcpListener,
    acceptor: Arc<dyn Acceptor>,
    mux: Multiplexer,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Listener {} shutting down", id);
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((socket, peer_addr)) => {
                        tracing::debug!("Listener {} accepted {}", id, peer_addr);
                        tokio::spawn(handshake(
                            socket,
                            peer_addr,
                            Arc::clone(&acceptor),
                            mux.clone(),
                            cancel.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::error!("Listener {} failed to accept connection: {}", id, e);
                    }
                }
            }
        }
    }
}

/// Complete the acceptor's handshake; only then does a session exist
async fn handshake(
    socket: TcpStream,
    peer_addr: SocketAddr,
    acceptor: Arc<dyn Acceptor>,
    mux: Multiplexer,
    cancel: CancellationToken,
) {
    let io = tokio::select! {
        _ = cancel.cancelled() => return,
        io = acceptor.accept(socket) => io,
    };

    match io {
        Ok(io) => {
            if let Err(e) = mux.on_new_connection(io, PeerAddr::from(peer_addr)) {
                tracing::warn!("Dropping connection from {}: {}", peer_addr, e);
            }
        }
        Err(e) => {
            tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
        }
    }
}
