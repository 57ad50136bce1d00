//! WebSocket transport for the signaling channel
//!
//! Each JSON text frame carries one [`SignalingMessage`]. The server side
//! accepts exactly one peer; the client side connects to such a server (or to
//! any peer speaking the same framing).

mod client;
mod server;

pub use client::connect;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};

use super::{SignalingChannel, SignalingMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, warn};

/// Bridge an established WebSocket to an in-memory signaling channel
///
/// Messages sent on the returned channel go out as text frames; valid frames
/// coming in are delivered on it. Malformed frames are logged and dropped.
/// When the socket closes the channel terminates, and dropping the channel
/// closes the socket.
pub(crate) fn bridge<S>(ws_stream: WebSocketStream<S>) -> SignalingChannel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (local, remote) = SignalingChannel::pair();
    let (inbound, mut outbound) = remote.into_parts();
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match msg.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode signaling message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
        debug!("WebSocket writer finished");
    });

    tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => match SignalingMessage::from_json(&text) {
                    Ok(msg) => {
                        if inbound.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping malformed signaling frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }
        debug!("WebSocket reader finished");
    });

    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::{IceCandidate, SessionDescription};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_server_and_client_exchange_messages() {
        let server = WebSocketSignalingServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = format!("ws://{}", server.local_addr());

        let (peer_tx, mut peer_rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = server.start(move |channel| {
            let _ = peer_tx.send(channel);
        });

        let mut client = connect(&url).await.unwrap();
        let mut accepted = timeout(Duration::from_secs(5), peer_rx.recv())
            .await
            .unwrap()
            .unwrap();

        client
            .send(SignalingMessage::SessionDescription(SessionDescription::offer("v=0")))
            .unwrap();
        let received = timeout(Duration::from_secs(5), accepted.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            received,
            SignalingMessage::SessionDescription(SessionDescription::offer("v=0"))
        );

        accepted
            .send(SignalingMessage::IceCandidate(IceCandidate {
                candidate: "candidate:1".to_string(),
                ..Default::default()
            }))
            .unwrap();
        let received = timeout(Duration::from_secs(5), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, SignalingMessage::IceCandidate(_)));

        drop(client);
        let closed = timeout(Duration::from_secs(5), accepted.recv()).await.unwrap();
        assert!(closed.is_none());
    }
}
