//! Configuration types for WebRTC endpoints

use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration shared by source and sink endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// The single audio codec offered and accepted (default: Opus)
    pub audio_codec: CodecParams,

    /// The single video codec offered and accepted (default: VP8)
    pub video_codec: CodecParams,

    /// Tracks a sink negotiates as soon as signaling is available
    /// (default: one audio and one video track). Ignored by sources.
    pub tracks: Vec<MediaKind>,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// ICE server entry as handed to the peer connection engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// Username (empty for STUN)
    pub username: String,
    /// Credential (empty for STUN)
    pub credential: String,
}

/// RTP codec parameter set for one media kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParams {
    /// Mime type, e.g. `audio/opus`
    pub mime_type: String,

    /// RTP clock rate in Hz
    pub clock_rate: u32,

    /// Channel count (0 for video)
    pub channels: u16,

    /// RTP payload type
    pub payload_type: u8,

    /// `a=fmtp` parameters
    pub sdp_fmtp_line: String,
}

impl CodecParams {
    /// Opus, 48 kHz stereo with in-band FEC
    pub fn opus() -> Self {
        Self {
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: 2,
            payload_type: 111,
            sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        }
    }

    /// VP8 on the standard 90 kHz video clock
    pub fn vp8() -> Self {
        Self {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: 0,
            payload_type: 96,
            sdp_fmtp_line: String::new(),
        }
    }

    /// H.264 constrained baseline, packetization mode 1
    pub fn h264() -> Self {
        Self {
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            channels: 0,
            payload_type: 102,
            sdp_fmtp_line:
                "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                    .to_string(),
        }
    }

    /// Media kind implied by the mime type prefix
    pub fn kind(&self) -> Option<MediaKind> {
        let prefix = self.mime_type.split('/').next()?;
        if prefix.eq_ignore_ascii_case("audio") {
            Some(MediaKind::Audio)
        } else if prefix.eq_ignore_ascii_case("video") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            audio_codec: CodecParams::opus(),
            video_codec: CodecParams::vp8(),
            tracks: vec![MediaKind::Audio, MediaKind::Video],
        }
    }
}

impl EndpointConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a codec's mime type does not match the kind it is configured for
    /// - a codec has a zero clock rate
    /// - a STUN URL does not use the `stun:`/`stuns:` scheme
    /// - a TURN entry does not use `turn:`/`turns:` or lacks credentials
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for (expected, codec) in [
            (MediaKind::Audio, &self.audio_codec),
            (MediaKind::Video, &self.video_codec),
        ] {
            if codec.kind() != Some(expected) {
                return Err(Error::InvalidConfig(format!(
                    "{} codec has mime type {}",
                    expected, codec.mime_type
                )));
            }
            if codec.clock_rate == 0 {
                return Err(Error::InvalidConfig(format!(
                    "{} codec clock_rate must be non-zero",
                    expected
                )));
            }
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
            if turn.username.is_empty() || turn.credential.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires a username and credential",
                    turn.url
                )));
            }
        }

        Ok(())
    }

    /// Load a configuration from a JSON string
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Codec parameters configured for a media kind
    pub fn codec(&self, kind: MediaKind) -> &CodecParams {
        match kind {
            MediaKind::Audio => &self.audio_codec,
            MediaKind::Video => &self.video_codec,
        }
    }

    /// Flattened ICE server list (STUN entries first, then TURN)
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.stun_servers
            .iter()
            .map(|url| IceServer {
                urls: vec![url.clone()],
                username: String::new(),
                credential: String::new(),
            })
            .chain(self.turn_servers.iter().map(|turn| IceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            }))
            .collect()
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the video codec
    pub fn with_video_codec(mut self, codec: CodecParams) -> Self {
        self.video_codec = codec;
        self
    }

    /// Replace the initial sink tracks
    pub fn with_tracks(mut self, tracks: Vec<MediaKind>) -> Self {
        self.tracks = tracks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EndpointConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracks, vec![MediaKind::Audio, MediaKind::Video]);
    }

    #[test]
    fn test_codec_kind_mismatch_fails() {
        let mut config = EndpointConfig::default();
        config.audio_codec = CodecParams::vp8();
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_zero_clock_rate_fails() {
        let mut config = EndpointConfig::default();
        config.video_codec.clock_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_stun_url_fails() {
        let mut config = EndpointConfig::default();
        config.stun_servers = vec!["http://stun.example.com".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_turn_without_credentials_fails() {
        let config = EndpointConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: String::new(),
            credential: String::new(),
        }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ice_servers_flattening() {
        let config = EndpointConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        let servers = config.ice_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].username, "user");
    }

    #[test]
    fn test_codec_lookup_by_kind() {
        let config = EndpointConfig::default().with_video_codec(CodecParams::h264());
        assert_eq!(config.codec(MediaKind::Audio).clock_rate, 48000);
        assert_eq!(config.codec(MediaKind::Video).mime_type, "video/H264");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EndpointConfig::from_json_str(r#"{ "tracks": ["video"] }"#).unwrap();
        assert_eq!(config.tracks, vec![MediaKind::Video]);
        assert_eq!(config.audio_codec, CodecParams::opus());
    }

    #[test]
    fn test_invalid_json_is_serialization_error() {
        let err = EndpointConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, crate::Error::SerializationError(_)));
    }
}
