//! Outbound WebSocket session to the upstream streaming API.
//!
//! A session is a thin wrapper around one connection: inbound frames are
//! surfaced as typed events, outbound values are serialized to text
//! frames. Auth responses double as state transitions and are still
//! passed through as payload, matching what a direct connection would
//! see. Sessions do not reconnect; once `Closed` is observed the owner
//! opens a fresh session if it wants another.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use tdg_core::{TdgError, TdgResult};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Events surfaced by an upstream session.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// Transport handshake completed.
    Open,
    /// Upstream accepted our auth request.
    Authenticated,
    /// Upstream rejected our auth request.
    AuthFailed(String),
    /// An inbound frame, passed through untouched.
    Message(Value),
    /// The connection ended.
    Closed,
}

/// One streaming session to the upstream venue.
pub struct UpstreamSession {
    out_tx: mpsc::Sender<Value>,
    close_tx: mpsc::Sender<()>,
    events: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamSession {
    /// Connect and start the frame pump. The first event is always
    /// `Open`, the last is always `Closed`.
    pub async fn connect(url: &str) -> TdgResult<Self> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| TdgError::Transport(format!("upstream connect error: {e}")))?;

        debug!(url = %url, "upstream session connected");

        let (ws_sink, ws_read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::channel::<Value>(64);
        let (close_tx, close_rx) = mpsc::channel::<()>(1);
        let (event_tx, events) = mpsc::channel::<UpstreamEvent>(256);

        tokio::spawn(pump(ws_sink, ws_read, out_rx, close_rx, event_tx));

        Ok(Self {
            out_tx,
            close_tx,
            events,
        })
    }

    /// Send one JSON value as a text frame.
    pub async fn send(&self, value: Value) -> TdgResult<()> {
        self.out_tx
            .send(value)
            .await
            .map_err(|_| TdgError::Channel("upstream session closed".into()))
    }

    /// Next session event. `None` once the pump has stopped.
    pub async fn next_event(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    /// Ask the pump to send a close frame and stop. Idempotent; dropping
    /// the session has the same effect.
    pub fn close(&self) {
        let _ = self.close_tx.try_send(());
    }
}

async fn pump(
    mut sink: WsSink,
    mut read: WsRead,
    mut out_rx: mpsc::Receiver<Value>,
    mut close_rx: mpsc::Receiver<()>,
    event_tx: mpsc::Sender<UpstreamEvent>,
) {
    if event_tx.send(UpstreamEvent::Open).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            // Explicit close and owner drop both land here.
            _ = close_rx.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = out_rx.recv() => match outbound {
                Some(value) => {
                    if sink.send(Message::Text(value.to_string())).await.is_err() {
                        warn!("upstream send failed");
                        break;
                    }
                }
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !surface_frame(&text, &event_tx).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("upstream close frame received");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "upstream read error");
                    break;
                }
                None => break,
            },
        }
    }

    let _ = event_tx.send(UpstreamEvent::Closed).await;
}

/// Parse one inbound frame and emit events for it. Returns `false` when
/// the event channel is gone and the pump should stop.
async fn surface_frame(text: &str, event_tx: &mpsc::Sender<UpstreamEvent>) -> bool {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "undecodable upstream frame, dropping");
            return true;
        }
    };

    if let Some(event) = classify_auth(&value) {
        if event_tx.send(event).await.is_err() {
            return false;
        }
    }
    event_tx.send(UpstreamEvent::Message(value)).await.is_ok()
}

fn classify_auth(value: &Value) -> Option<UpstreamEvent> {
    if value.get("event")?.as_str()? != "auth" {
        return None;
    }
    match value.get("status").and_then(Value::as_str) {
        Some("OK") => Some(UpstreamEvent::Authenticated),
        _ => {
            let reason = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("authentication rejected")
                .to_string();
            Some(UpstreamEvent::AuthFailed(reason))
        }
    }
}
