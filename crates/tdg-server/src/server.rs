//! Core server: accepts downstream connections, runs one task per
//! client, and coordinates teardown.
//!
//! Each connection gets a single writer task fed by a bounded channel;
//! everything queued for a client leaves in queue order, so the
//! `["connected"]` ack always beats relayed upstream events. Inbound
//! frames are handled inline on the connection task, which keeps
//! per-client processing in arrival order without blocking other
//! clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use tdg_core::{frame_decode, frame_encode, TdgResult, TAG_CONNECTED};

use crate::bt::BacktestStore;
use crate::config::ServerConfig;
use crate::dispatch::dispatch;
use crate::proxy::UpstreamProxy;
use crate::registry::{
    ClientHandle, ClientId, ClientRegistry, ProxyRegistry, CLIENT_CHANNEL_CAPACITY,
};
use crate::transport::{start_listener, ClientConnection, Listener};
use crate::upstream::RestClient;

/// Shared resources handed to command handlers.
pub struct ServerCtx {
    pub config: ServerConfig,
    pub rest: Arc<RestClient>,
    pub clients: Arc<ClientRegistry>,
    pub proxies: Arc<ProxyRegistry>,
    pub backtests: Arc<BacktestStore>,
}

impl ServerCtx {
    fn new(config: ServerConfig) -> TdgResult<Self> {
        let rest = Arc::new(RestClient::new(&config.upstream)?);
        Ok(Self {
            config,
            rest,
            clients: Arc::new(ClientRegistry::new()),
            proxies: Arc::new(ProxyRegistry::new()),
            backtests: Arc::new(BacktestStore::new()),
        })
    }
}

/// Cloneable handle that stops a running server.
#[derive(Clone)]
pub struct CloseHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl CloseHandle {
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The gateway server.
pub struct DataServer {
    ctx: Arc<ServerCtx>,
    listener: Listener,
    next_client_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl DataServer {
    /// Bind the downstream listener. Port 0 binds an ephemeral port.
    pub async fn bind(config: ServerConfig) -> TdgResult<Self> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let listener = start_listener(bind_addr).await?;
        let ctx = Arc::new(ServerCtx::new(config)?);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            ctx,
            listener,
            next_client_id: AtomicU64::new(1),
            shutdown_tx,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr
    }

    /// Handle for stopping the server from another task.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept clients until the close handle fires, then run the
    /// shutdown cascade.
    pub async fn run(mut self) -> TdgResult<()> {
        info!(
            port = self.listener.local_addr.port(),
            proxy = self.ctx.config.upstream.proxy,
            transform = self.ctx.config.upstream.transform,
            "server running"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                maybe_conn = self.listener.conn_rx.recv() => match maybe_conn {
                    Some(conn) => self.spawn_client(conn),
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    info!("close requested, stopping accept loop");
                    break;
                }
            }
        }

        self.shutdown().await;
        info!("server stopped");
        Ok(())
    }

    fn spawn_client(&self, conn: ClientConnection) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let ctx = self.ctx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(handle_client(ctx, client_id, conn, shutdown_rx));
    }

    /// Broadcast reaches every connection task, which unregisters its
    /// client and closes its proxy. Proxies not yet claimed by a task
    /// are closed here. The listening socket is released when the
    /// listener drops with the server.
    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        for proxy in self.ctx.proxies.drain().await {
            proxy.close().await;
        }
    }
}

async fn handle_client(
    ctx: Arc<ServerCtx>,
    client_id: ClientId,
    conn: ClientConnection,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let remote = conn.remote_addr;
    let (mut ws_tx, mut ws_rx) = conn.ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_CHANNEL_CAPACITY);
    let handle = ClientHandle::new(client_id, remote, tx);

    // Single writer for this connection.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    ctx.clients.register(handle.clone()).await;

    // Queued before the proxy exists, so the ack always goes out first.
    handle.send(frame_encode(TAG_CONNECTED, vec![])).await;

    if ctx.config.upstream.proxy {
        let proxy = UpstreamProxy::open(
            client_id,
            ctx.config.upstream.clone(),
            ctx.clients.clone(),
        );
        if let Some(previous) = ctx.proxies.insert(client_id, proxy).await {
            previous.close().await;
        }
    }

    loop {
        tokio::select! {
            inbound = ws_rx.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_frame(&ctx, &handle, &text).await,
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => handle_frame(&ctx, &handle, &text).await,
                    Err(_) => warn!(client_id, "non-UTF-8 binary frame, dropping"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    handle.send_message(Message::Pong(payload)).await
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(client_id, error = %e, "client socket error");
                    break;
                }
            },
            _ = shutdown_rx.recv() => {
                debug!(client_id, "server closing, dropping client");
                break;
            }
        }
    }

    // Teardown order: registry entry first so nothing can route to this
    // client anymore, then the proxy session.
    ctx.clients.unregister(client_id).await;
    if let Some(proxy) = ctx.proxies.remove(client_id).await {
        proxy.close().await;
    }

    // Dropping our sender lets the writer drain and close the socket.
    drop(handle);
    let _ = writer.await;

    info!(client_id, remote = %remote, "client disconnected");
}

async fn handle_frame(ctx: &ServerCtx, client: &ClientHandle, text: &str) {
    match frame_decode(text) {
        Ok(frame) => dispatch(ctx, client, frame).await,
        Err(e) => warn!(client_id = client.id, error = %e, "undecodable frame, dropping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Duration};

    fn test_config(proxy: bool, ws_url: &str) -> ServerConfig {
        ServerConfig {
            port: 0,
            upstream: UpstreamConfig {
                ws_url: ws_url.to_string(),
                rest_url: "http://127.0.0.1:1".into(),
                api_key: None,
                api_secret: None,
                agent: None,
                transform: false,
                proxy,
            },
        }
    }

    async fn start_server(config: ServerConfig) -> (String, CloseHandle, Arc<ServerCtx>) {
        let server = DataServer::bind(config).await.unwrap();
        let url = format!("ws://127.0.0.1:{}", server.local_addr().port());
        let close = server.close_handle();
        let ctx = server.ctx.clone();
        tokio::spawn(server.run());
        (url, close, ctx)
    }

    /// Upstream stub that greets every connection with one info event.
    async fn fake_upstream() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let _ = ws
                        .send(Message::Text(
                            json!({"event": "info", "version": 2}).to_string(),
                        ))
                        .await;
                    while let Some(Ok(msg)) = ws.next().await {
                        if matches!(msg, Message::Close(_)) {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    async fn next_text(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Vec<Value> {
        loop {
            let msg = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection ended")
                .expect("socket error");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn first_frame_is_the_connected_ack() {
        let (url, close, _ctx) = start_server(test_config(false, "ws://127.0.0.1:1")).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert_eq!(next_text(&mut ws).await, vec![json!("connected")]);

        close.close();
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_dropped_silently() {
        let (url, close, _ctx) = start_server(test_config(false, "ws://127.0.0.1:1")).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert_eq!(next_text(&mut ws).await, vec![json!("connected")]);

        // None of these may produce a reply or kill the connection.
        ws.send(Message::Text("{oops".into())).await.unwrap();
        ws.send(Message::Text(json!({"event": "x"}).to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(json!(["get.positions"]).to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(json!([42, "x"]).to_string()))
            .await
            .unwrap();

        // A failing known command still answers, which proves the frames
        // above were dropped without a response (per-client ordering).
        ws.send(Message::Text(json!(["get.trades", "tBTCUSD"]).to_string()))
            .await
            .unwrap();
        let frame = next_text(&mut ws).await;
        assert_eq!(frame[0], json!("error"));
        assert!(frame[1].as_str().unwrap().contains("missing start"));

        close.close();
    }

    #[tokio::test]
    async fn proxied_clients_see_upstream_events_after_the_ack() {
        let upstream = fake_upstream().await;
        let (url, close, ctx) = start_server(test_config(true, &format!("ws://{upstream}"))).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert_eq!(next_text(&mut ws).await, vec![json!("connected")]);

        let frame = next_text(&mut ws).await;
        assert_eq!(frame[0], json!("bfx"));
        assert_eq!(frame[1], json!({"event": "info", "version": 2}));

        assert_eq!(ctx.clients.count().await, 1);
        assert_eq!(ctx.proxies.count().await, 1);

        close.close();
    }

    #[tokio::test]
    async fn disconnect_tears_down_registry_and_proxy() {
        let upstream = fake_upstream().await;
        let (url, close, ctx) = start_server(test_config(true, &format!("ws://{upstream}"))).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert_eq!(next_text(&mut ws).await, vec![json!("connected")]);
        assert_eq!(ctx.clients.count().await, 1);

        ws.send(Message::Close(None)).await.unwrap();
        drop(ws);

        let mut cleaned = false;
        for _ in 0..100 {
            if ctx.clients.count().await == 0 && ctx.proxies.count().await == 0 {
                cleaned = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(cleaned, "registries not cleaned up after disconnect");

        close.close();
    }

    #[tokio::test]
    async fn clients_get_independent_proxy_sessions() {
        let upstream = fake_upstream().await;
        let (url, close, ctx) = start_server(test_config(true, &format!("ws://{upstream}"))).await;

        let (mut ws1, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut ws2, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        // Each client gets its own ack and its own relayed greeting.
        for ws in [&mut ws1, &mut ws2] {
            assert_eq!(next_text(ws).await, vec![json!("connected")]);
            let frame = next_text(ws).await;
            assert_eq!(frame[0], json!("bfx"));
        }
        assert_eq!(ctx.clients.count().await, 2);
        assert_eq!(ctx.proxies.count().await, 2);

        // One client leaving does not disturb the other's session.
        ws1.send(Message::Close(None)).await.unwrap();
        drop(ws1);
        for _ in 0..100 {
            if ctx.clients.count().await == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(ctx.clients.count().await, 1);
        assert_eq!(ctx.proxies.count().await, 1);

        close.close();
    }

    #[tokio::test]
    async fn close_stops_accepting_and_drains_clients() {
        let upstream = fake_upstream().await;
        let (url, close, ctx) = start_server(test_config(true, &format!("ws://{upstream}"))).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        assert_eq!(next_text(&mut ws).await, vec![json!("connected")]);

        close.close();

        let mut drained = false;
        for _ in 0..100 {
            let refused = tokio_tungstenite::connect_async(&url).await.is_err();
            if refused && ctx.clients.count().await == 0 && ctx.proxies.count().await == 0 {
                drained = true;
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(drained, "server did not drain after close");
    }
}
