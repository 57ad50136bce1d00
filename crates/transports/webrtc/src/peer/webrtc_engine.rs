//! Peer connection engine backed by webrtc-rs

use super::{ConnectionState, EngineEvent, EngineEvents, PeerConnectionEngine};
use crate::config::{CodecParams, EndpointConfig};
use crate::media::{MediaKind, TrackId, TrackInfo};
use crate::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

/// RTCP read buffer size for local track senders
const RTCP_BUFFER_SIZE: usize = 1500;

struct LocalTrack {
    track: Arc<TrackLocalStaticRTP>,
    next_sequence_number: AtomicU16,
}

/// webrtc-rs peer connection with exactly one audio and one video codec
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    audio_codec: CodecParams,
    video_codec: CodecParams,
    local_tracks: RwLock<HashMap<TrackId, Arc<LocalTrack>>>,
    /// Remote tracks already reported, keyed by transceiver mid
    remote_tracks: Arc<Mutex<HashSet<TrackId>>>,
    /// Set once teardown starts; remote reads ending after this are not removals
    closing: Arc<AtomicBool>,
}

impl WebRtcEngine {
    /// Create the peer connection and wire its callbacks to an event stream
    #[instrument(skip(config))]
    pub async fn start(config: &EndpointConfig) -> Result<(Arc<Self>, EngineEvents)> {
        let mut media_engine = MediaEngine::default();
        register_codec(&mut media_engine, &config.audio_codec, RTPCodecType::Audio)?;
        register_codec(&mut media_engine, &config.video_codec, RTPCodecType::Video)?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .ice_servers()
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username,
                credential: server.credential,
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let remote_tracks = Arc::new(Mutex::new(HashSet::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let tx = events_tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(EngineEvent::IceCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let tx = events_tx.clone();
        let teardown = Arc::clone(&closing);
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let tx = tx.clone();
                if matches!(
                    s,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    teardown.store(true, Ordering::SeqCst);
                }
                Box::pin(async move {
                    let state = match s {
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => ConnectionState::New,
                    };
                    info!("Peer connection state changed: {:?}", state);
                    let _ = tx.send(EngineEvent::ConnectionStateChange(state));
                })
            },
        ));

        let tx = events_tx;
        let known = Arc::clone(&remote_tracks);
        let teardown = Arc::clone(&closing);
        peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  transceiver: Arc<RTCRtpTransceiver>| {
                let tx = tx.clone();
                let known = Arc::clone(&known);
                let teardown = Arc::clone(&teardown);
                Box::pin(async move {
                    let Some(mid) = transceiver.mid() else {
                        warn!("Remote track without mid, ignoring");
                        return;
                    };
                    let Some(kind) = media_kind(track.kind()) else {
                        warn!("Remote track {} has unsupported kind {}", mid, track.kind());
                        return;
                    };
                    let track_id = TrackId::new(mid.to_string());

                    if known.lock().await.insert(track_id.clone()) {
                        let _ = tx.send(EngineEvent::Track(TrackInfo::new(track_id.clone(), kind)));
                    }

                    let muted_tx = tx.clone();
                    let muted_id = track_id.clone();
                    track.onmute(move || {
                        let tx = muted_tx.clone();
                        let id = muted_id.clone();
                        Box::pin(async move {
                            info!("Remote track {} muted", id);
                            let _ = tx.send(EngineEvent::TrackMuted(id));
                        })
                    });

                    info!("Starting RTP reader for remote {} track {}", kind, track_id);
                    tokio::spawn(read_remote_track(track, track_id, tx, teardown));
                })
            },
        ));

        info!(
            "Peer connection created (audio={}, video={})",
            config.audio_codec.mime_type, config.video_codec.mime_type
        );

        let engine = Arc::new(Self {
            peer_connection,
            audio_codec: config.audio_codec.clone(),
            video_codec: config.video_codec.clone(),
            local_tracks: RwLock::new(HashMap::new()),
            remote_tracks,
            closing,
        });

        Ok((engine, events_rx))
    }

    fn codec(&self, kind: MediaKind) -> &CodecParams {
        match kind {
            MediaKind::Audio => &self.audio_codec,
            MediaKind::Video => &self.video_codec,
        }
    }

    async fn local_sdp(&self) -> Result<String> {
        let desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description".to_string()))?;
        Ok(desc.sdp)
    }

    /// Tracks announced by the remote offer that were not reported yet
    async fn announced_remote_tracks(&self) -> Vec<TrackInfo> {
        let mut known = self.remote_tracks.lock().await;
        let mut tracks = Vec::new();

        for transceiver in self.peer_connection.get_transceivers().await {
            if transceiver.direction() == RTCRtpTransceiverDirection::Sendonly {
                continue;
            }
            let Some(mid) = transceiver.mid() else {
                continue;
            };
            let Some(kind) = media_kind(transceiver.kind()) else {
                continue;
            };
            let id = TrackId::new(mid.to_string());
            if known.insert(id.clone()) {
                tracks.push(TrackInfo::new(id, kind));
            }
        }

        tracks
    }
}

#[async_trait]
impl PeerConnectionEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_local_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        debug!("Local description applied ({} bytes)", self.local_sdp().await?.len());
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<Vec<TrackInfo>> {
        let is_offer = desc.sdp_type == SdpType::Offer;
        let desc = to_rtc_description(desc)?;
        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        if is_offer {
            Ok(self.announced_remote_tracks().await)
        } else {
            Ok(Vec::new())
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, kind: MediaKind) -> Result<TrackId> {
        let codec = self.codec(kind);
        let uuid = Uuid::new_v4();
        let id = TrackId::new(uuid.to_string());

        let track = Arc::new(TrackLocalStaticRTP::new(
            codec_capability(codec),
            id.to_string(),
            format!("pipeline-{}", kind),
        ));

        let transceiver = self
            .peer_connection
            .add_transceiver_from_track(
                Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add {} track: {}", kind, e)))?;

        // Interceptors only run while someone drains RTCP
        let sender = transceiver.sender().await;
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
        });

        self.local_tracks.write().await.insert(
            id.clone(),
            Arc::new(LocalTrack {
                track,
                next_sequence_number: AtomicU16::new(initial_sequence_number(&uuid)),
            }),
        );

        Ok(id)
    }

    async fn send_rtp(&self, track_id: &TrackId, mut packet: Packet) -> Result<()> {
        let local = self
            .local_tracks
            .read()
            .await
            .get(track_id)
            .cloned()
            .ok_or_else(|| Error::MediaTrackError(format!("Unknown local track {}", track_id)))?;

        packet.header.sequence_number = local.next_sequence_number.fetch_add(1, Ordering::Relaxed);

        local
            .track
            .write_rtp(&packet)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to write RTP: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}

async fn read_remote_track(
    track: Arc<TrackRemote>,
    track_id: TrackId,
    tx: mpsc::UnboundedSender<EngineEvent>,
    closing: Arc<AtomicBool>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _attributes)) => {
                let event = EngineEvent::Rtp {
                    track_id: track_id.clone(),
                    packet,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("RTP read on track {} ended: {}", track_id, e);
                if let Some(event) = track_end_event(&track_id, &closing) {
                    let _ = tx.send(event);
                }
                break;
            }
        }
    }
    info!("RTP reader for track {} finished", track_id);
}

/// A remote track whose reads stop outside teardown was removed by the peer
fn track_end_event(track_id: &TrackId, closing: &AtomicBool) -> Option<EngineEvent> {
    if closing.load(Ordering::SeqCst) {
        None
    } else {
        warn!("Remote track {} ended while the connection was open", track_id);
        Some(EngineEvent::TrackRemoved(track_id.clone()))
    }
}

/// RTP sequence numbers start from the low bits of the track's random id
fn initial_sequence_number(id: &Uuid) -> u16 {
    let bytes = id.as_bytes();
    u16::from_be_bytes([bytes[14], bytes[15]])
}

fn register_codec(
    media_engine: &mut MediaEngine,
    codec: &CodecParams,
    codec_type: RTPCodecType,
) -> Result<()> {
    media_engine
        .register_codec(
            RTCRtpCodecParameters {
                capability: codec_capability(codec),
                payload_type: codec.payload_type,
                stats_id: String::new(),
            },
            codec_type,
        )
        .map_err(|e| {
            Error::WebRtcError(format!("Failed to register codec {}: {}", codec.mime_type, e))
        })
}

fn codec_capability(codec: &CodecParams) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type.clone(),
        clock_rate: codec.clock_rate,
        channels: codec.channels,
        sdp_fmtp_line: codec.sdp_fmtp_line.clone(),
        rtcp_feedback: vec![],
    }
}

fn media_kind(codec_type: RTPCodecType) -> Option<MediaKind> {
    match codec_type {
        RTPCodecType::Audio => Some(MediaKind::Audio),
        RTPCodecType::Video => Some(MediaKind::Video),
        _ => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| Error::SdpError(format!("Failed to parse SDP: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_capability_copies_params() {
        let cap = codec_capability(&CodecParams::opus());
        assert_eq!(cap.mime_type, "audio/opus");
        assert_eq!(cap.clock_rate, 48000);
        assert_eq!(cap.channels, 2);
        assert!(cap.rtcp_feedback.is_empty());
    }

    #[test]
    fn test_media_kind_mapping() {
        assert_eq!(media_kind(RTPCodecType::Audio), Some(MediaKind::Audio));
        assert_eq!(media_kind(RTPCodecType::Video), Some(MediaKind::Video));
        assert_eq!(media_kind(RTPCodecType::Unspecified), None);
    }

    #[test]
    fn test_initial_sequence_number_from_track_id() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0011_2233_4455_beef);
        assert_eq!(initial_sequence_number(&id), 0xbeef);
    }

    #[test]
    fn test_track_end_reports_removal_only_while_open() {
        let id = TrackId::from("0");
        let closing = AtomicBool::new(false);
        assert!(matches!(
            track_end_event(&id, &closing),
            Some(EngineEvent::TrackRemoved(removed)) if removed == id
        ));

        closing.store(true, Ordering::SeqCst);
        assert!(track_end_event(&id, &closing).is_none());
    }

    #[tokio::test]
    async fn test_close_marks_teardown() {
        let config = EndpointConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let (engine, _events) = WebRtcEngine::start(&config).await.unwrap();
        assert!(!engine.closing.load(Ordering::SeqCst));

        engine.close().await.unwrap();
        assert!(engine.closing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_offer_contains_added_tracks() {
        let config = EndpointConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let (engine, _events) = WebRtcEngine::start(&config).await.unwrap();

        let audio = engine.add_track(MediaKind::Audio).await.unwrap();
        let video = engine.add_track(MediaKind::Video).await.unwrap();
        assert_ne!(audio, video);

        let offer = engine.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("opus/48000/2"));
        assert!(offer.sdp.contains("VP8/90000"));

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_announces_remote_tracks_by_mid() {
        let config = EndpointConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let (offerer, _offerer_events) = WebRtcEngine::start(&config).await.unwrap();
        let (answerer, _answerer_events) = WebRtcEngine::start(&config).await.unwrap();

        offerer.add_track(MediaKind::Audio).await.unwrap();
        offerer.add_track(MediaKind::Video).await.unwrap();
        let offer = offerer.create_offer().await.unwrap();
        offerer.set_local_description(offer.clone()).await.unwrap();

        let tracks = answerer.set_remote_description(offer).await.unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].kind, MediaKind::Audio);
        assert_eq!(tracks[1].kind, MediaKind::Video);
        assert_ne!(tracks[0].id, tracks[1].id);

        let answer = answerer.create_answer().await.unwrap();
        answerer.set_local_description(answer.clone()).await.unwrap();
        let none = offerer.set_remote_description(answer).await.unwrap();
        assert!(none.is_empty());

        offerer.close().await.unwrap();
        answerer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_on_unknown_track_fails() {
        let config = EndpointConfig {
            stun_servers: vec![],
            ..Default::default()
        };
        let (engine, _events) = WebRtcEngine::start(&config).await.unwrap();
        let err = engine
            .send_rtp(&TrackId::from("missing"), Packet::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MediaTrackError(_)));
    }
}
