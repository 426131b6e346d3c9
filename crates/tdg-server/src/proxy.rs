//! Per-client upstream proxy sessions.
//!
//! With proxying enabled, every downstream client gets a dedicated
//! upstream streaming session opened at accept time. The proxy owns that
//! session's lifecycle (connect, optional auth, close) and relays every
//! upstream message to the owning client as a `["bfx", ...]` frame. A
//! client that vanished between event arrival and delivery is an expected
//! race: the event is dropped and the session is torn down separately.

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use serde_json::Value;
use tdg_core::auth::{auth_nonce, build_auth_request};
use tdg_core::{frame_encode, TAG_BFX};

use crate::config::UpstreamConfig;
use crate::registry::{ClientId, ClientRegistry};
use crate::upstream::{UpstreamEvent, UpstreamSession};

/// Lifecycle state of one proxy session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Connecting,
    Open,
    Authenticating,
    Authenticated,
    Closing,
    Closed,
}

/// One upstream session bound to one downstream client.
pub struct UpstreamProxy {
    client_id: ClientId,
    state: Arc<RwLock<ProxyState>>,
    cancel_tx: mpsc::Sender<()>,
}

impl UpstreamProxy {
    /// Open an upstream session for `client_id` and start relaying.
    ///
    /// Connection and auth happen in the background; the proxy is
    /// immediately registrable and closable.
    pub fn open(
        client_id: ClientId,
        config: UpstreamConfig,
        clients: Arc<ClientRegistry>,
    ) -> Arc<Self> {
        let state = Arc::new(RwLock::new(ProxyState::Connecting));
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>(1);

        let proxy = Arc::new(Self {
            client_id,
            state: state.clone(),
            cancel_tx,
        });

        tokio::spawn(run_session(client_id, config, clients, state, cancel_rx));

        proxy
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ProxyState {
        *self.state.read().await
    }

    /// Close the session. Idempotent: the first call signals the session
    /// task, later calls see `Closing` or `Closed` and return.
    pub async fn close(&self) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ProxyState::Closing | ProxyState::Closed) {
                return;
            }
            *state = ProxyState::Closing;
        }
        debug!(client_id = self.client_id, "proxy close requested");
        let _ = self.cancel_tx.try_send(());
    }
}

// Closing and Closed are one-way: once teardown starts, session events
// may no longer move the state backwards.
async fn set_state(state: &RwLock<ProxyState>, next: ProxyState) {
    let mut current = state.write().await;
    match *current {
        ProxyState::Closed => {}
        ProxyState::Closing if next != ProxyState::Closed => {}
        _ => *current = next,
    }
}

/// Drive one session from connect to close, relaying message events to
/// the owning client.
async fn run_session(
    client_id: ClientId,
    config: UpstreamConfig,
    clients: Arc<ClientRegistry>,
    state: Arc<RwLock<ProxyState>>,
    mut cancel_rx: mpsc::Receiver<()>,
) {
    let mut session = tokio::select! {
        _ = cancel_rx.recv() => {
            debug!(client_id, "proxy cancelled before upstream connect finished");
            set_state(&state, ProxyState::Closed).await;
            return;
        }
        connected = UpstreamSession::connect(&config.ws_url) => match connected {
            Ok(session) => session,
            Err(e) => {
                warn!(client_id, error = %e, "upstream connect failed");
                set_state(&state, ProxyState::Closed).await;
                return;
            }
        },
    };

    loop {
        tokio::select! {
            _ = cancel_rx.recv() => {
                session.close();
                // Hold Closing until the session confirms the upstream close.
                while let Some(event) = session.next_event().await {
                    if matches!(event, UpstreamEvent::Closed) {
                        break;
                    }
                }
                break;
            }
            event = session.next_event() => match event {
                Some(UpstreamEvent::Open) => {
                    info!(client_id, "proxy session open");
                    set_state(&state, ProxyState::Open).await;
                    if let Some((key, secret)) = config.credentials() {
                        let request = build_auth_request(key, secret, auth_nonce());
                        if let Err(e) = session.send(request).await {
                            warn!(client_id, error = %e, "auth request send failed");
                        } else {
                            set_state(&state, ProxyState::Authenticating).await;
                        }
                    }
                }
                Some(UpstreamEvent::Authenticated) => {
                    info!(client_id, "proxy session authenticated");
                    set_state(&state, ProxyState::Authenticated).await;
                }
                Some(UpstreamEvent::AuthFailed(reason)) => {
                    // The session stays usable for public data.
                    warn!(client_id, reason = %reason, "proxy auth failed");
                    set_state(&state, ProxyState::Open).await;
                }
                Some(UpstreamEvent::Message(value)) => {
                    relay(&clients, client_id, value).await;
                }
                Some(UpstreamEvent::Closed) | None => {
                    debug!(client_id, "upstream session ended");
                    break;
                }
            },
        }
    }

    set_state(&state, ProxyState::Closed).await;
    debug!(client_id, "proxy session closed");
}

/// Forward one upstream event to the owning client. Lookup failure means
/// the client is gone; the event is dropped without error.
async fn relay(clients: &ClientRegistry, client_id: ClientId, event: Value) {
    let Some(client) = clients.lookup(client_id).await else {
        debug!(client_id, "client gone, dropping upstream event");
        return;
    };
    if !client.is_open() {
        debug!(client_id, "client transport closed, dropping upstream event");
        return;
    }
    client.send(frame_encode(TAG_BFX, vec![event])).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::tungstenite::Message;

    fn test_config(ws_url: String) -> UpstreamConfig {
        UpstreamConfig {
            ws_url,
            rest_url: String::new(),
            api_key: None,
            api_secret: None,
            agent: None,
            transform: false,
            proxy: true,
        }
    }

    async fn register_client(
        clients: &ClientRegistry,
        id: ClientId,
    ) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(32);
        let remote: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        clients
            .register(crate::registry::ClientHandle::new(id, remote, tx))
            .await;
        rx
    }

    async fn wait_for_state(proxy: &UpstreamProxy, wanted: ProxyState) {
        for _ in 0..100 {
            if proxy.state().await == wanted {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("proxy never reached {wanted:?}");
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<Message>) -> Value {
        let msg = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("client channel closed");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        serde_json::from_str(&text).unwrap()
    }

    /// Upstream stub that pushes the given frames to the first connection.
    async fn fake_upstream(frames: Vec<Value>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.to_string())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn relays_messages_as_bfx_frames() {
        let clients = Arc::new(ClientRegistry::new());
        let mut rx = register_client(&clients, 1).await;

        let addr = fake_upstream(vec![json!({"event": "info"}), json!([5, "te", [1, 2]])]).await;
        let proxy = UpstreamProxy::open(1, test_config(format!("ws://{addr}")), clients.clone());
        wait_for_state(&proxy, ProxyState::Open).await;

        assert_eq!(recv_frame(&mut rx).await, json!(["bfx", {"event": "info"}]));
        assert_eq!(recv_frame(&mut rx).await, json!(["bfx", [5, "te", [1, 2]]]));

        proxy.close().await;
        wait_for_state(&proxy, ProxyState::Closed).await;
    }

    #[tokio::test]
    async fn authenticates_then_relays_exactly_once() {
        let clients = Arc::new(ClientRegistry::new());
        let mut rx = register_client(&clients, 2).await;

        // Stub that answers the auth request, then pushes one trade update.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["event"] == "auth" {
                        assert_eq!(value["apiKey"], "key-1");
                        assert!(value["authSig"].is_string());
                        ws.send(Message::Text(
                            json!({"event": "auth", "status": "OK"}).to_string(),
                        ))
                        .await
                        .unwrap();
                        ws.send(Message::Text(json!([42, "tu", [7, 8]]).to_string()))
                            .await
                            .unwrap();
                    }
                }
            }
        });

        let mut config = test_config(format!("ws://{addr}"));
        config.api_key = Some("key-1".into());
        config.api_secret = Some("secret-1".into());

        let proxy = UpstreamProxy::open(2, config, clients.clone());
        wait_for_state(&proxy, ProxyState::Authenticated).await;

        // The raw auth response is passed through, then the trade update.
        assert_eq!(
            recv_frame(&mut rx).await,
            json!(["bfx", {"event": "auth", "status": "OK"}])
        );
        assert_eq!(recv_frame(&mut rx).await, json!(["bfx", [42, "tu", [7, 8]]]));

        proxy.close().await;
        wait_for_state(&proxy, ProxyState::Closed).await;
        // Nothing further was relayed: the update arrived exactly once.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let addr = fake_upstream(vec![]).await;
        let clients = Arc::new(ClientRegistry::new());
        let proxy = UpstreamProxy::open(3, test_config(format!("ws://{addr}")), clients);

        proxy.close().await;
        proxy.close().await;
        proxy.close().await;
        wait_for_state(&proxy, ProxyState::Closed).await;
    }

    #[tokio::test]
    async fn closed_follows_upstream_close_frame() {
        let clients = Arc::new(ClientRegistry::new());
        let (closed_tx, mut closed_rx) = mpsc::channel::<()>(1);

        // Stub that reports when the peer's close frame arrives.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    let _ = closed_tx.send(()).await;
                    break;
                }
            }
        });

        let proxy = UpstreamProxy::open(6, test_config(format!("ws://{addr}")), clients);
        wait_for_state(&proxy, ProxyState::Open).await;

        proxy.close().await;
        wait_for_state(&proxy, ProxyState::Closed).await;
        // Closed lands only after the close frame went upstream.
        timeout(Duration::from_secs(5), closed_rx.recv())
            .await
            .expect("upstream never saw a close frame")
            .unwrap();
    }

    #[tokio::test]
    async fn connect_failure_ends_closed() {
        let clients = Arc::new(ClientRegistry::new());
        // Nothing listens on this port.
        let proxy = UpstreamProxy::open(4, test_config("ws://127.0.0.1:9".into()), clients);
        wait_for_state(&proxy, ProxyState::Closed).await;
    }

    #[tokio::test]
    async fn events_for_departed_clients_are_dropped() {
        let clients = Arc::new(ClientRegistry::new());
        let mut rx = register_client(&clients, 5).await;

        let addr = fake_upstream(vec![json!({"event": "info"})]).await;
        let proxy = UpstreamProxy::open(5, test_config(format!("ws://{addr}")), clients.clone());

        // First event arrives while the client is registered.
        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(first.is_some());

        // After unregistering, relay drops events instead of failing.
        clients.unregister(5).await;
        relay(&clients, 5, json!({"late": true})).await;
        assert!(rx.try_recv().is_err());

        proxy.close().await;
        wait_for_state(&proxy, ProxyState::Closed).await;
    }
}
