//! Error types for WebRTC endpoints

/// Result type alias using the endpoint Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in endpoint operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Offer or answer received in a role or state that forbids it
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Remote peer muted or removed a track
    #[error("Track rejected by remote peer: {0}")]
    TrackRejected(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The endpoint event loop has already terminated
    #[error("Endpoint closed")]
    EndpointClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a negotiation protocol violation
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::ProtocolViolation(_))
    }

    /// Check if this error originates from the signaling path
    pub fn is_signaling_error(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::SerializationError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::ProtocolViolation("offer in sink role".to_string());
        assert_eq!(err.to_string(), "Protocol violation: offer in sink role");
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::ProtocolViolation("x".to_string()).is_protocol_violation());
        assert!(!Error::SdpError("x".to_string()).is_protocol_violation());

        assert!(Error::SignalingError("x".to_string()).is_signaling_error());
        assert!(Error::WebSocketError("x".to_string()).is_signaling_error());
        assert!(!Error::EndpointClosed.is_signaling_error());

        assert!(Error::InvalidConfig("x".to_string()).is_config_error());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = Error::from(parse_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::IoError(_)));
    }
}
