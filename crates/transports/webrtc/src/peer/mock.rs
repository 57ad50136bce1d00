//! Scripted engine for state machine tests

use super::{EngineEvent, EngineEvents, PeerConnectionEngine};
use crate::media::{MediaKind, TrackId, TrackInfo};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddIceCandidate(String),
    AddTrack(MediaKind, TrackId),
    SendRtp(TrackId, u32),
    Close,
}

#[derive(Default)]
pub(crate) struct MockEngine {
    calls: Mutex<Vec<Call>>,
    remote_tracks: Mutex<VecDeque<Vec<TrackInfo>>>,
    next_track: Mutex<usize>,
}

impl MockEngine {
    pub(crate) fn start() -> (Arc<Self>, mpsc::UnboundedSender<EngineEvent>, EngineEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::default()), tx, rx)
    }

    /// Tracks returned by the next remote offer
    pub(crate) fn script_remote_tracks(&self, tracks: Vec<TrackInfo>) {
        self.remote_tracks.lock().unwrap().push_back(tracks);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnectionEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer("mock-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer("mock-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.record(Call::SetLocal(desc.sdp_type));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<Vec<TrackInfo>> {
        self.record(Call::SetRemote(desc.sdp_type));
        if desc.sdp == "invalid" {
            return Err(Error::SdpError("unparseable".to_string()));
        }
        match desc.sdp_type {
            SdpType::Offer => Ok(self
                .remote_tracks
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()),
            SdpType::Answer => Ok(Vec::new()),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddIceCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self, kind: MediaKind) -> Result<TrackId> {
        let id = {
            let mut next = self.next_track.lock().unwrap();
            *next += 1;
            TrackId::new(format!("local-{}", next))
        };
        self.record(Call::AddTrack(kind, id.clone()));
        Ok(id)
    }

    async fn send_rtp(&self, track_id: &TrackId, packet: Packet) -> Result<()> {
        self.record(Call::SendRtp(track_id.clone(), packet.header.timestamp));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}
