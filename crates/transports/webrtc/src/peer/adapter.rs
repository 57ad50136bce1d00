//! Thin, logged front for a peer connection engine

use super::{EngineEvent, EngineEvents, PeerConnectionEngine, WebRtcEngine};
use crate::config::EndpointConfig;
use crate::media::{MediaKind, TrackId, TrackInfo};
use crate::signaling::{IceCandidate, SessionDescription};
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};
use webrtc::rtp::packet::Packet;

/// Owns one engine instance on behalf of an endpoint
///
/// Every call is forwarded to the engine; failures are returned to the caller,
/// which treats them as fatal.
#[derive(Clone)]
pub struct PeerConnectionAdapter {
    engine: Arc<dyn PeerConnectionEngine>,
}

impl PeerConnectionAdapter {
    /// Start a webrtc-rs engine configured from `config`
    #[instrument(skip(config))]
    pub async fn start(config: &EndpointConfig) -> Result<(Self, EngineEvents)> {
        let (engine, events) = WebRtcEngine::start(config).await?;
        info!("Peer connection engine started");
        Ok((Self::new(engine), events))
    }

    /// Wrap an already running engine
    pub fn new(engine: Arc<dyn PeerConnectionEngine>) -> Self {
        Self { engine }
    }

    /// Create an offer
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.engine.create_offer().await?;
        debug!("Created SDP offer ({} bytes)", offer.sdp.len());
        Ok(offer)
    }

    /// Create an answer
    pub async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.engine.create_answer().await?;
        debug!("Created SDP answer ({} bytes)", answer.sdp.len());
        Ok(answer)
    }

    /// Apply a local description
    pub async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        debug!("Setting local {:?} description", desc.sdp_type);
        self.engine.set_local_description(desc).await
    }

    /// Apply a remote description, returning newly announced remote tracks
    pub async fn set_remote_description(&self, desc: SessionDescription) -> Result<Vec<TrackInfo>> {
        debug!("Setting remote {:?} description", desc.sdp_type);
        let tracks = self.engine.set_remote_description(desc).await?;
        if !tracks.is_empty() {
            info!("Remote description announced {} track(s)", tracks.len());
        }
        Ok(tracks)
    }

    /// Add a remote ICE candidate
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        debug!("Adding remote ICE candidate: {}", candidate.candidate);
        self.engine.add_ice_candidate(candidate).await
    }

    /// Add a local track
    pub async fn add_track(&self, kind: MediaKind) -> Result<TrackId> {
        let id = self.engine.add_track(kind).await?;
        info!("Added local {} track {}", kind, id);
        Ok(id)
    }

    /// Send one RTP packet on a local track
    pub async fn send_media(&self, track_id: &TrackId, packet: Packet) -> Result<()> {
        trace!(
            "Sending RTP on track {}: ts={} {} bytes",
            track_id,
            packet.header.timestamp,
            packet.payload.len()
        );
        self.engine.send_rtp(track_id, packet).await
    }

    /// Close the engine
    pub async fn close(&self) -> Result<()> {
        info!("Closing peer connection engine");
        self.engine.close().await
    }

    /// Watch an engine's event stream
    ///
    /// Spawns a task that hands each event to `forward` and passes `None` once
    /// the engine stream ends. The task stops early when `forward` returns
    /// `false`.
    pub(crate) fn monitor<F>(mut events: EngineEvents, forward: F)
    where
        F: Fn(Option<EngineEvent>) -> bool + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !forward(Some(event)) {
                    return;
                }
            }
            debug!("Engine event stream ended");
            forward(None);
        });
    }
}
