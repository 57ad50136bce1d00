//! WebRTC source and sink endpoints for media pipelines
//!
//! This crate bridges a media pipeline and exactly one remote WebRTC peer.
//! A **source** receives remote tracks and turns their RTP packets into
//! pipeline buffers on output pads; a **sink** negotiates outgoing tracks and
//! turns buffers on its input pads into RTP.
//!
//! # Features
//!
//! - **Role-fixed negotiation**: sinks always offer, sources always answer
//! - **Batched track negotiation**: one outstanding offer at a time
//! - **Late pad binding**: packets are queued per track until a pad appears
//! - **Pluggable engine**: webrtc-rs by default, any [`PeerConnectionEngine`]
//! - **JSON signaling over WebSocket**: single-peer server or client
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Pipeline host                                       │
//! │  ↓ SinkHandle / SourceHandle        ↑ PipelineAction │
//! │  Endpoint task (one event queue, strictly ordered)   │
//! │  ├─ SinkState / SourceState (negotiation, routing)  │
//! │  ├─ Session (status, ICE queues, signaling sender)  │
//! │  └─ PeerConnectionAdapter                           │
//! │     ↓                                                │
//! │  PeerConnectionEngine (WebRtcEngine)   SignalingChannel
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use pipeline_webrtc::{EndpointConfig, MediaKind};
//!
//! let config = EndpointConfig::default().with_tracks(vec![MediaKind::Audio]);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.codec(MediaKind::Audio).clock_rate, 48000);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use pipeline_webrtc::{
//!     EndpointConfig, MediaKind, PadOptions, PadRef, PipelineAction, SignalingSource,
//!     SourceEndpoint,
//! };
//!
//! # async fn example() -> pipeline_webrtc::Result<()> {
//! let signaling = SignalingSource::WebSocket {
//!     bind_addr: "0.0.0.0:8829".parse().unwrap(),
//! };
//! let (source, mut actions) = SourceEndpoint::start(EndpointConfig::default(), signaling).await?;
//!
//! while let Some(action) = actions.recv().await {
//!     if let PipelineAction::Terminate(reason) = action {
//!         println!("source closed: {}", reason);
//!         break;
//!     }
//! }
//! # let _ = (source, PadRef::from("video"), PadOptions::kind(MediaKind::Video));
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;

pub use config::{CodecParams, EndpointConfig, IceServer, TurnServerConfig};
pub use endpoint::{
    CloseReason, ConnectionStatus, Notification, PipelineAction, PipelineActions, SinkEndpoint,
    SinkHandle, SourceEndpoint, SourceHandle,
};
pub use error::{Error, Result};
pub use media::{
    Buffer, MediaKind, PadOptions, PadRef, RtpMetadata, RtpStreamFormat, TrackId, TrackInfo,
};
pub use peer::{
    ConnectionState, EngineEvent, EngineEvents, PeerConnectionAdapter, PeerConnectionEngine,
    WebRtcEngine,
};
pub use signaling::{
    IceCandidate, SdpType, SessionDescription, SignalingChannel, SignalingMessage,
    SignalingSource,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
