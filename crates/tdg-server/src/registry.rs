//! Client and proxy registries.
//!
//! The client registry maps connection IDs to live client handles; the
//! proxy registry maps the same IDs to their dedicated upstream sessions.
//! Registry membership defines "connected": an entry exists exactly while
//! the connection is open and not yet torn down, so a failed lookup means
//! the client is gone and the caller drops whatever it was delivering.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use crate::proxy::UpstreamProxy;

/// Process-unique identifier for a downstream client connection.
pub type ClientId = u64;

/// Outbound frames queued per client before senders start waiting.
pub const CLIENT_CHANNEL_CAPACITY: usize = 256;

/// Cheap-to-clone handle to one downstream connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Identifier assigned at accept time.
    pub id: ClientId,
    /// Remote peer address.
    pub remote: SocketAddr,
    /// Sender feeding the connection's writer task.
    tx: mpsc::Sender<Message>,
}

impl ClientHandle {
    pub fn new(id: ClientId, remote: SocketAddr, tx: mpsc::Sender<Message>) -> Self {
        Self { id, remote, tx }
    }

    /// Whether the connection's writer is still running.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame for delivery, waiting for channel capacity.
    ///
    /// A send to a client that disconnected mid-flight is an expected
    /// race, not a fault: the frame is dropped.
    pub async fn send(&self, frame: String) {
        let _ = self.tx.send(Message::Text(frame)).await;
    }

    /// Queue a raw WebSocket message (pong replies).
    pub(crate) async fn send_message(&self, message: Message) {
        let _ = self.tx.send(message).await;
    }
}

/// Registry of connected clients.
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a client, making it discoverable by ID.
    pub async fn register(&self, handle: ClientHandle) {
        let id = handle.id;
        let remote = handle.remote;
        self.clients.write().await.insert(id, handle);
        info!(client_id = id, remote = %remote, "client registered");
    }

    /// Remove a client. Idempotent: removing an absent ID is a no-op.
    pub async fn unregister(&self, id: ClientId) {
        if self.clients.write().await.remove(&id).is_some() {
            debug!(client_id = id, "client unregistered");
        }
    }

    /// Look up a live client. `None` means not (or no longer) connected.
    pub async fn lookup(&self, id: ClientId) -> Option<ClientHandle> {
        self.clients.read().await.get(&id).cloned()
    }

    /// Number of connected clients.
    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}

/// Registry of per-client upstream proxy sessions.
///
/// A client has at most one proxy session; insert replaces (the caller
/// closes any session it replaces).
pub struct ProxyRegistry {
    proxies: Arc<RwLock<HashMap<ClientId, Arc<UpstreamProxy>>>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self {
            proxies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach a proxy session to a client.
    pub async fn insert(&self, id: ClientId, proxy: Arc<UpstreamProxy>) -> Option<Arc<UpstreamProxy>> {
        self.proxies.write().await.insert(id, proxy)
    }

    /// Detach and return a client's proxy session, if it has one.
    pub async fn remove(&self, id: ClientId) -> Option<Arc<UpstreamProxy>> {
        self.proxies.write().await.remove(&id)
    }

    /// Number of live proxy sessions.
    pub async fn count(&self) -> usize {
        self.proxies.read().await.len()
    }

    /// Detach every proxy session (shutdown path).
    pub async fn drain(&self) -> Vec<Arc<UpstreamProxy>> {
        let mut proxies = self.proxies.write().await;
        std::mem::take(&mut *proxies).into_values().collect()
    }
}
