//! Single-peer WebSocket signaling server
//!
//! The first client that completes the WebSocket handshake becomes the
//! endpoint's signaling peer. Later connections are refused with a close frame.

use super::bridge;
use crate::signaling::SignalingChannel;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{error, info, warn};

/// Time a client gets to complete the WebSocket upgrade
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket signaling server bound to a local address
pub struct WebSocketSignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WebSocketSignalingServer {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            Error::WebSocketError(format!("Failed to bind signaling server to {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        info!("WebSocket signaling server listening on ws://{}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop in the background
    ///
    /// `on_peer` is called once, with the channel of the first peer that
    /// completes the handshake. Each handshake runs in its own task and is
    /// abandoned after [`HANDSHAKE_TIMEOUT`].
    pub fn start<F>(self, on_peer: F) -> WebSocketServerHandle
    where
        F: FnOnce(SignalingChannel) + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let Self {
            listener,
            local_addr,
        } = self;

        let task = tokio::spawn(async move {
            let on_peer = Arc::new(Mutex::new(Some(on_peer)));
            let mut handshakes = JoinSet::new();

            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                let on_peer = Arc::clone(&on_peer);
                                handshakes.spawn(handshake(stream, peer_addr, on_peer));
                            }
                            Err(e) => error!("Failed to accept signaling connection: {}", e),
                        }
                    }
                    Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
                    _ = &mut shutdown_rx => {
                        info!("WebSocket signaling server on {} shutting down", local_addr);
                        break;
                    }
                }
            }

            // Pending handshakes are aborted with the set
            handshakes.shutdown().await;
        });

        WebSocketServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

async fn handshake<F>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    on_peer: Arc<Mutex<Option<F>>>,
) where
    F: FnOnce(SignalingChannel) + Send + 'static,
{
    let mut ws_stream = match timeout(HANDSHAKE_TIMEOUT, accept_async(stream)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", peer_addr, e);
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out", peer_addr);
            return;
        }
    };

    let callback = on_peer.lock().await.take();
    match callback {
        Some(callback) => {
            info!("Signaling peer connected from {}", peer_addr);
            callback(bridge(ws_stream));
        }
        None => {
            warn!("Refusing additional signaling peer {}", peer_addr);
            let _ = ws_stream.close(None).await;
        }
    }
}

/// Handle to a running signaling server
///
/// The accept loop stops on [`WebSocketServerHandle::shutdown`] or when the
/// handle is dropped. An already accepted peer is not affected.
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WebSocketServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
