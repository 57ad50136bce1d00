//! Endpoint test harness
//!
//! Provides a scripted [`PeerConnectionEngine`] plus helpers for driving an
//! endpoint through its public handles:
//! - `ScriptedEngine` records every engine call and returns scripted remote tracks
//! - `next_action` / `next_message` await output with a timeout
//! - `eventually` polls a condition until it holds
//!
//! Basic usage pattern:
//!
//! 1. Create a `ScriptedEngine` with `ScriptedEngine::start()`
//! 2. Start an endpoint with `start_with_adapter` and a `SignalingChannel::pair()` half
//! 3. Play the remote peer on the other half
//! 4. Inject engine events through the returned sender

#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_webrtc::{
    EngineEvent, EngineEvents, Error, IceCandidate, MediaKind, PeerConnectionAdapter,
    PeerConnectionEngine, PipelineAction, PipelineActions, Result, SdpType, SessionDescription,
    SignalingChannel, SignalingMessage, TrackId, TrackInfo,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use webrtc::rtp::packet::Packet;

/// How long helpers wait before failing a test
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// SDP body that makes the scripted engine reject a remote description
pub const UNPARSEABLE_SDP: &str = "v=garbage";

/// Engine call as observed by the scripted engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddIceCandidate(String),
    AddTrack(MediaKind),
    Close,
}

/// Packet handed to the engine for sending
#[derive(Debug, Clone)]
pub struct SentPacket {
    pub track_id: TrackId,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

/// Peer connection engine that negotiates nothing and records everything
#[derive(Default)]
pub struct ScriptedEngine {
    calls: Mutex<Vec<EngineCall>>,
    sent: Mutex<Vec<SentPacket>>,
    offered_tracks: Mutex<VecDeque<Vec<TrackInfo>>>,
    local_tracks: Mutex<u32>,
}

impl ScriptedEngine {
    /// Create an engine and the adapter, event injector and event stream around it
    pub fn start() -> (
        Arc<Self>,
        PeerConnectionAdapter,
        mpsc::UnboundedSender<EngineEvent>,
        EngineEvents,
    ) {
        init_tracing();
        let engine = Arc::new(Self::default());
        let adapter = PeerConnectionAdapter::new(engine.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        (engine, adapter, tx, rx)
    }

    /// Remote tracks announced by the next remote offer
    pub fn announce_on_next_offer(&self, tracks: Vec<TrackInfo>) {
        self.offered_tracks.lock().unwrap().push_back(tracks);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnectionEngine for ScriptedEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateOffer);
        Ok(SessionDescription::offer("v=0 scripted offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(EngineCall::CreateAnswer);
        Ok(SessionDescription::answer("v=0 scripted answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(EngineCall::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<Vec<TrackInfo>> {
        self.record(EngineCall::SetRemote(desc.sdp_type));
        if desc.sdp == UNPARSEABLE_SDP {
            return Err(Error::SdpError("scripted parse failure".to_string()));
        }
        Ok(match desc.sdp_type {
            SdpType::Offer => self
                .offered_tracks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default(),
            SdpType::Answer => Vec::new(),
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(EngineCall::AddIceCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, kind: MediaKind) -> Result<TrackId> {
        self.record(EngineCall::AddTrack(kind));
        let mut next = self.local_tracks.lock().unwrap();
        *next += 1;
        Ok(TrackId::new(format!("{}-{}", kind, next)))
    }

    async fn send_rtp(&self, track_id: &TrackId, packet: Packet) -> Result<()> {
        self.sent.lock().unwrap().push(SentPacket {
            track_id: track_id.clone(),
            timestamp: packet.header.timestamp,
            payload: packet.payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(EngineCall::Close);
        Ok(())
    }
}

/// Route endpoint logs to the test output (honours `RUST_LOG`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wait for the next pipeline action
pub async fn next_action(actions: &mut PipelineActions) -> PipelineAction {
    tokio::time::timeout(TIMEOUT, actions.recv())
        .await
        .expect("timed out waiting for a pipeline action")
        .expect("action stream ended")
}

/// Skip actions until one matches
pub async fn action_matching<F>(actions: &mut PipelineActions, pred: F) -> PipelineAction
where
    F: Fn(&PipelineAction) -> bool,
{
    loop {
        let action = next_action(actions).await;
        if pred(&action) {
            return action;
        }
    }
}

/// Wait for the next message the endpoint sent to its peer
pub async fn next_message(peer: &mut SignalingChannel) -> SignalingMessage {
    tokio::time::timeout(TIMEOUT, peer.recv())
        .await
        .expect("timed out waiting for a signaling message")
        .expect("signaling channel closed")
}

/// Poll until `condition` holds
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition did not hold in time");
}

/// A remote ICE candidate as a browser would send it
pub fn remote_candidate(port: u16) -> SignalingMessage {
    SignalingMessage::IceCandidate(IceCandidate {
        candidate: format!("candidate:1 1 udp 2122260223 192.0.2.1 {} typ host", port),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    })
}

/// An inbound RTP packet
pub fn rtp_packet(sequence_number: u16, payload: &[u8]) -> Packet {
    let mut packet = Packet::default();
    packet.header.version = 2;
    packet.header.sequence_number = sequence_number;
    packet.header.timestamp = sequence_number as u32 * 960;
    packet.payload = bytes::Bytes::copy_from_slice(payload);
    packet
}
