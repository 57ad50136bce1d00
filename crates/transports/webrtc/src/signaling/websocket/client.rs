//! WebSocket signaling client

use super::bridge;
use crate::signaling::SignalingChannel;
use crate::{Error, Result};
use tokio_tungstenite::connect_async;
use tracing::info;

/// Connect to a WebSocket signaling server
///
/// Returns the channel once the handshake completes.
pub async fn connect(url: &str) -> Result<SignalingChannel> {
    info!("Connecting to signaling server: {}", url);

    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::WebSocketError(format!("Failed to connect to {}: {}", url, e)))?;

    info!("Connected to signaling server");

    Ok(bridge(ws_stream))
}
