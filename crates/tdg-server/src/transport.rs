//! WebSocket listener for downstream clients using tokio-tungstenite.
//!
//! The accept loop runs in the background and hands completed handshakes
//! to the server over a channel. Dropping the receiver stops the loop and
//! releases the listening socket.

use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tdg_core::{TdgError, TdgResult};

/// A handle to an accepted downstream connection.
pub struct ClientConnection {
    /// The WebSocket stream (split into sink + stream in usage).
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    /// Remote address.
    pub remote_addr: SocketAddr,
}

/// A started listener: the address actually bound plus the stream of
/// accepted connections.
pub struct Listener {
    pub local_addr: SocketAddr,
    pub conn_rx: mpsc::Receiver<ClientConnection>,
}

/// Bind the listening socket and start accepting in the background.
pub async fn start_listener(bind_addr: SocketAddr) -> TdgResult<Listener> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TdgError::Transport(format!("bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| TdgError::Transport(format!("local_addr failed: {e}")))?;

    info!(addr = %local_addr, "listening for clients");

    let (tx, rx) = mpsc::channel::<ClientConnection>(64);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("connection channel closed, releasing listener");
                    break;
                }
                accepted = tcp_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws_stream) => {
                                    debug!(remote = %addr, "client connection accepted");
                                    let conn = ClientConnection {
                                        ws_stream,
                                        remote_addr: addr,
                                    };
                                    if tx.send(conn).await.is_err() {
                                        warn!("connection channel closed");
                                    }
                                }
                                Err(e) => {
                                    warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                                }
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "TCP accept failed");
                    }
                },
            }
        }
    });

    Ok(Listener {
        local_addr,
        conn_rx: rx,
    })
}
