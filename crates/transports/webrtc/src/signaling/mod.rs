//! Signaling channel between an endpoint and its single remote peer
//!
//! The channel carries exactly two message kinds, session descriptions and ICE
//! candidates, in the order they were sent. It is either handed to the
//! endpoint directly ([`SignalingSource::Channel`]) or produced by a locally
//! started WebSocket endpoint once a peer connects
//! ([`SignalingSource::WebSocket`]).

pub mod websocket;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
}

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Opaque SDP payload
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser `RTCIceCandidateInit` JSON shape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media line index
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Message exchanged over the signaling channel
///
/// On the wire this is `{"type": "sdp_offer" | "sdp_answer" | "ice_candidate", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub enum SignalingMessage {
    /// SDP offer or answer
    SessionDescription(SessionDescription),
    /// ICE candidate
    IceCandidate(IceCandidate),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WireMessage {
    SdpOffer(SessionDescription),
    SdpAnswer(SessionDescription),
    IceCandidate(IceCandidate),
}

impl From<SignalingMessage> for WireMessage {
    fn from(msg: SignalingMessage) -> Self {
        match msg {
            SignalingMessage::SessionDescription(desc) => match desc.sdp_type {
                SdpType::Offer => WireMessage::SdpOffer(desc),
                SdpType::Answer => WireMessage::SdpAnswer(desc),
            },
            SignalingMessage::IceCandidate(candidate) => WireMessage::IceCandidate(candidate),
        }
    }
}

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = String;

    fn try_from(wire: WireMessage) -> std::result::Result<Self, Self::Error> {
        match wire {
            WireMessage::SdpOffer(desc) if desc.sdp_type == SdpType::Offer => {
                Ok(SignalingMessage::SessionDescription(desc))
            }
            WireMessage::SdpAnswer(desc) if desc.sdp_type == SdpType::Answer => {
                Ok(SignalingMessage::SessionDescription(desc))
            }
            WireMessage::SdpOffer(_) | WireMessage::SdpAnswer(_) => {
                Err("session description type does not match message type".to_string())
            }
            WireMessage::IceCandidate(candidate) => Ok(SignalingMessage::IceCandidate(candidate)),
        }
    }
}

impl SignalingMessage {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON text frame
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Sending half of a signaling channel
#[derive(Debug, Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

impl SignalingSender {
    /// Send a message to the remote peer
    ///
    /// Fire-and-forget: there is no acknowledgment. Fails only when the remote
    /// side has already gone away.
    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::SignalingError("signaling channel closed".to_string()))
    }
}

/// Event produced by a registered signaling channel
#[derive(Debug)]
pub enum SignalingEvent {
    /// A channel became available (WebSocket peer connected, or channel handed in)
    Available(SignalingChannel),
    /// Message received from the remote peer
    Message(SignalingMessage),
    /// The remote side of the channel went away
    Terminated,
}

/// Ordered, bidirectional signaling channel to exactly one remote peer
#[derive(Debug)]
pub struct SignalingChannel {
    sender: SignalingSender,
    receiver: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl SignalingChannel {
    /// Create two connected in-memory channel ends
    ///
    /// Whatever one end sends, the other receives. Dropping an end terminates
    /// the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: SignalingSender { tx: a_tx },
                receiver: b_rx,
            },
            Self {
                sender: SignalingSender { tx: b_tx },
                receiver: a_rx,
            },
        )
    }

    /// Send a message to the remote peer
    pub fn send(&self, msg: SignalingMessage) -> Result<()> {
        self.sender.send(msg)
    }

    /// Receive the next message, or `None` once the remote side went away
    pub async fn recv(&mut self) -> Option<SignalingMessage> {
        self.receiver.recv().await
    }

    /// Next already-delivered message, without waiting
    pub fn try_recv(&mut self) -> Option<SignalingMessage> {
        self.receiver.try_recv().ok()
    }

    /// Clone of the sending half
    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    /// Bind this channel to its sole consumer
    ///
    /// Spawns a task that hands every received message to `forward`, followed
    /// by [`SignalingEvent::Terminated`] when the remote side goes away. The
    /// task stops early once `forward` returns `false`. Returns the sending
    /// half for the consumer to keep.
    pub fn register<F>(self, forward: F) -> SignalingSender
    where
        F: Fn(SignalingEvent) -> bool + Send + 'static,
    {
        let Self {
            sender,
            mut receiver,
        } = self;

        tokio::spawn(async move {
            while let Some(msg) = receiver.recv().await {
                if !forward(SignalingEvent::Message(msg)) {
                    debug!("Signaling consumer gone, stopping forwarder");
                    return;
                }
            }
            forward(SignalingEvent::Terminated);
        });

        sender
    }

    fn into_parts(self) -> (SignalingSender, mpsc::UnboundedReceiver<SignalingMessage>) {
        (self.sender, self.receiver)
    }
}

/// Where an endpoint gets its signaling channel from
#[derive(Debug)]
pub enum SignalingSource {
    /// A channel provided by the caller, available immediately
    Channel(SignalingChannel),
    /// Start a WebSocket endpoint on this address and use the first peer
    /// that connects
    WebSocket {
        /// Address to listen on (port 0 picks a free port)
        bind_addr: SocketAddr,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let msg = SignalingMessage::SessionDescription(SessionDescription::offer("v=0"));
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "sdp_offer");
        assert_eq!(json["data"]["type"], "offer");
        assert_eq!(json["data"]["sdp"], "v=0");
    }

    #[test]
    fn test_ice_candidate_wire_format() {
        let json = r#"{"type":"ice_candidate","data":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let msg = SignalingMessage::from_json(json).unwrap();

        match msg {
            SignalingMessage::IceCandidate(c) => {
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
                assert!(c.username_fragment.is_none());
            }
            other => panic!("Expected ICE candidate, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_description_type_rejected() {
        let json = r#"{"type":"sdp_answer","data":{"type":"offer","sdp":"v=0"}}"#;
        assert!(SignalingMessage::from_json(json).is_err());
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let json = r#"{"type":"peer.announce","data":{}}"#;
        let err = SignalingMessage::from_json(json).unwrap_err();
        assert!(err.is_signaling_error());
    }

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, mut b) = SignalingChannel::pair();
        a.send(SignalingMessage::SessionDescription(SessionDescription::offer("1")))
            .unwrap();
        a.send(SignalingMessage::IceCandidate(IceCandidate::default()))
            .unwrap();

        assert!(matches!(
            b.recv().await,
            Some(SignalingMessage::SessionDescription(_))
        ));
        assert!(matches!(b.recv().await, Some(SignalingMessage::IceCandidate(_))));

        drop(a);
        assert!(b.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_register_forwards_then_terminates() {
        let (ours, theirs) = SignalingChannel::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sender = ours.register(move |event| tx.send(event).is_ok());

        theirs
            .send(SignalingMessage::SessionDescription(SessionDescription::answer("a")))
            .unwrap();
        drop(theirs);

        assert!(matches!(rx.recv().await, Some(SignalingEvent::Message(_))));
        assert!(matches!(rx.recv().await, Some(SignalingEvent::Terminated)));
    }
}
