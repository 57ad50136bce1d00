//! Peer connection engine abstraction
//!
//! Endpoints never touch webrtc-rs directly. They drive a
//! [`PeerConnectionEngine`] through a [`PeerConnectionAdapter`] and consume the
//! engine's [`EngineEvent`] stream. [`WebRtcEngine`] is the production engine.

mod adapter;
#[cfg(test)]
pub(crate) mod mock;
mod webrtc_engine;

pub use adapter::PeerConnectionAdapter;
pub use webrtc_engine::WebRtcEngine;

use crate::media::{MediaKind, TrackId, TrackInfo};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

/// Peer connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity temporarily lost
    Disconnected,
    /// Connection failed
    Failed,
    /// Connection closed
    Closed,
}

impl ConnectionState {
    /// Whether the connection can no longer carry media
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Asynchronous notification from a peer connection engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A remote track became known
    Track(TrackInfo),
    /// RTP packet received on a remote track
    Rtp {
        /// Track the packet belongs to
        track_id: TrackId,
        /// The packet
        packet: Packet,
    },
    /// Local ICE candidate gathered
    IceCandidate(IceCandidate),
    /// Peer connection state changed
    ConnectionStateChange(ConnectionState),
    /// Remote peer muted a track
    TrackMuted(TrackId),
    /// Remote peer removed a track
    TrackRemoved(TrackId),
    /// Anything else the engine reports
    Other(String),
}

/// Receiving end of an engine's event stream
///
/// The stream ends when the engine terminates.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Operations an endpoint needs from a peer connection implementation
#[async_trait]
pub trait PeerConnectionEngine: Send + Sync {
    /// Create an SDP offer covering all added tracks
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an SDP answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    ///
    /// For an offer, returns the remote tracks it announced that were not
    /// known before. For an answer, returns an empty list.
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<Vec<TrackInfo>>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Add a local send-only track of the given kind
    async fn add_track(&self, kind: MediaKind) -> Result<TrackId>;

    /// Send an RTP packet on a local track
    ///
    /// The engine fills in sequence number, SSRC and payload type.
    async fn send_rtp(&self, track_id: &TrackId, packet: Packet) -> Result<()>;

    /// Close the peer connection
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }
}
