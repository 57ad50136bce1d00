//! Media types shared by the source and sink endpoints
//!
//! Tracks, pads, pipeline buffers and the stream format announced on bound
//! pads. Conversion between RTP packets and buffers lives in [`dispatcher`].

pub mod dispatcher;
pub mod packet_queue;

use crate::config::CodecParams;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use packet_queue::PacketQueue;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Lowercase name used in logs and mime types
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque track identifier assigned by the peer connection engine
///
/// Stable for the lifetime of the track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Wrap an engine-provided identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identity of a track as reported to the pipeline parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Engine-assigned track ID
    pub id: TrackId,
    /// Track kind
    pub kind: MediaKind,
}

impl TrackInfo {
    /// Create track info
    pub fn new(id: impl Into<TrackId>, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Name of a pipeline pad
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadRef(String);

impl PadRef {
    /// Create a pad reference
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Pad name
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether the pad is named after the given track
    pub(crate) fn names_track(&self, id: &TrackId) -> bool {
        self.0 == id.as_str()
    }
}

impl fmt::Display for PadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PadRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Options supplied by the pipeline when it adds a pad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadOptions {
    /// Requested track kind. When `None` the pad name is matched against
    /// track IDs instead.
    pub kind: Option<MediaKind>,
}

impl PadOptions {
    /// Options requesting a track of the given kind
    pub fn kind(kind: MediaKind) -> Self {
        Self { kind: Some(kind) }
    }

    /// Whether a track satisfies these options for the given pad
    pub(crate) fn matches(&self, pad: &PadRef, track: &TrackInfo) -> bool {
        match self.kind {
            Some(kind) => track.kind == kind,
            None => pad.names_track(&track.id),
        }
    }
}

/// RTP header fields carried alongside a pipeline buffer
///
/// Copied verbatim from the received packet and never reinterpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpMetadata {
    /// RTP sequence number
    pub sequence_number: u16,
    /// RTP timestamp in codec clock units
    pub timestamp: u32,
    /// Marker bit
    pub marker: bool,
    /// Synchronization source
    pub ssrc: u32,
    /// Payload type
    pub payload_type: u8,
    /// Contributing sources
    pub csrc: Vec<u32>,
    /// Padding flag
    pub padding: bool,
}

/// Media buffer exchanged with the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    /// Raw RTP payload
    pub payload: Bytes,
    /// Presentation timestamp
    pub pts: Option<Duration>,
    /// RTP metadata of the packet this buffer came from, if any
    pub metadata: Option<RtpMetadata>,
}

impl Buffer {
    /// Create a buffer with a payload and presentation timestamp
    pub fn new(payload: impl Into<Bytes>, pts: Duration) -> Self {
        Self {
            payload: payload.into(),
            pts: Some(pts),
            metadata: None,
        }
    }

    /// Attach RTP metadata
    pub fn with_metadata(mut self, metadata: RtpMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Stream format announced on a bound pad
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpStreamFormat {
    /// Track kind
    pub kind: MediaKind,
    /// Codec parameters negotiated for that kind
    pub codec: CodecParams,
}
