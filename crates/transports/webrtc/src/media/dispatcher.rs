//! Media dispatcher: RTP packets ⇄ pipeline buffers
//!
//! Inbound packets become buffers carrying the raw payload plus the RTP header
//! as [`RtpMetadata`]. Outbound buffers become packets whose RTP timestamp is
//! the buffer PTS rescaled to the codec clock.

use super::{Buffer, RtpMetadata};
use crate::{Error, Result};
use std::time::Duration;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

/// RTP protocol version written on outbound packets
const RTP_VERSION: u8 = 2;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Convert an engine-delivered RTP packet into a pipeline buffer
pub fn rtp_to_buffer(packet: Packet) -> Buffer {
    let metadata = RtpMetadata::from(&packet.header);
    Buffer {
        payload: packet.payload,
        pts: None,
        metadata: Some(metadata),
    }
}

/// Convert a pipeline buffer into an RTP packet for a track clocked at `clock_rate`
///
/// Sequence number, SSRC and payload type are left for the engine to fill.
pub fn buffer_to_rtp(buffer: Buffer, clock_rate: u32) -> Result<Packet> {
    let pts = buffer.pts.ok_or_else(|| {
        Error::InvalidData("buffer has no presentation timestamp".to_string())
    })?;
    let marker = buffer.metadata.as_ref().map(|m| m.marker).unwrap_or(false);

    Ok(Packet {
        header: Header {
            version: RTP_VERSION,
            marker,
            timestamp: rtp_timestamp(pts, clock_rate),
            ..Default::default()
        },
        payload: buffer.payload,
    })
}

/// Rescale a presentation timestamp into RTP clock units
///
/// The result wraps modulo 2^32 like any RTP timestamp.
pub fn rtp_timestamp(pts: Duration, clock_rate: u32) -> u32 {
    (pts.as_nanos() * clock_rate as u128 / NANOS_PER_SECOND) as u32
}

impl From<&Header> for RtpMetadata {
    fn from(header: &Header) -> Self {
        Self {
            sequence_number: header.sequence_number,
            timestamp: header.timestamp,
            marker: header.marker,
            ssrc: header.ssrc,
            payload_type: header.payload_type,
            csrc: header.csrc.clone(),
            padding: header.padding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(seq: u16, ts: u32, marker: bool, payload: &'static [u8]) -> Packet {
        Packet {
            header: Header {
                version: 2,
                sequence_number: seq,
                timestamp: ts,
                marker,
                ssrc: 0xdead_beef,
                payload_type: 111,
                ..Default::default()
            },
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_rtp_to_buffer_keeps_payload_and_header() {
        let buffer = rtp_to_buffer(packet(7, 960, true, b"opus"));

        assert_eq!(&buffer.payload[..], b"opus");
        assert_eq!(buffer.pts, None);

        let meta = buffer.metadata.expect("metadata");
        assert_eq!(meta.sequence_number, 7);
        assert_eq!(meta.timestamp, 960);
        assert!(meta.marker);
        assert_eq!(meta.ssrc, 0xdead_beef);
        assert_eq!(meta.payload_type, 111);
    }

    #[test]
    fn test_rtp_timestamp_rescaling() {
        assert_eq!(rtp_timestamp(Duration::from_millis(20), 48_000), 960);
        assert_eq!(rtp_timestamp(Duration::from_secs(1), 90_000), 90_000);
        assert_eq!(rtp_timestamp(Duration::from_nanos(33_333_333), 90_000), 2_999);
    }

    #[test]
    fn test_rtp_timestamp_wraps() {
        // 2^32 / 90_000 ≈ 47721.86 s
        let ts = rtp_timestamp(Duration::from_secs(47_722), 90_000);
        assert_eq!(ts, (47_722u64 * 90_000 % (1u64 << 32)) as u32);
    }

    #[test]
    fn test_buffer_to_rtp_uses_marker_from_metadata() {
        let buffer = Buffer::new(Bytes::from_static(b"frame"), Duration::from_millis(40))
            .with_metadata(RtpMetadata {
                marker: true,
                ..Default::default()
            });

        let packet = buffer_to_rtp(buffer, 90_000).unwrap();
        assert!(packet.header.marker);
        assert_eq!(packet.header.timestamp, 3_600);
        assert_eq!(packet.header.version, 2);
        assert_eq!(&packet.payload[..], b"frame");
    }

    #[test]
    fn test_buffer_to_rtp_marker_defaults_to_false() {
        let buffer = Buffer::new(Bytes::from_static(b"a"), Duration::ZERO);
        let packet = buffer_to_rtp(buffer, 48_000).unwrap();
        assert!(!packet.header.marker);
        assert_eq!(packet.header.timestamp, 0);
    }

    #[test]
    fn test_buffer_without_pts_is_rejected() {
        let buffer = Buffer {
            payload: Bytes::from_static(b"a"),
            pts: None,
            metadata: None,
        };
        let err = buffer_to_rtp(buffer, 48_000).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
