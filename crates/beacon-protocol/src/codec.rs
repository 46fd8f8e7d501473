//! Codec for encoding and decoding Beacon frames.
//!
//! This module provides MessagePack-based serialization with length-prefixed
//! framing. Both frame directions share the same codec, so the functions are
//! generic over the frame type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a frame to length-prefixed bytes.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<F: Serialize>(frame: &F) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<F: Serialize>(frame: &F, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<F: DeserializeOwned>(data: &[u8]) -> Result<F, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<F: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<F>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ClientFrame, ServerFrame, UserSummary};

    #[test]
    fn test_encode_decode_roundtrip() {
        let frames = vec![
            ClientFrame::connect(1, Some("ticket-abc".to_string())),
            ClientFrame::send_private("msg-1", "user-2"),
            ClientFrame::send_group("msg-2", "group-7"),
            ClientFrame::typing("user-2", true),
            ClientFrame::ping(),
            ClientFrame::UpdateAvailability {
                is_available: false,
                reason: Some("lunch".to_string()),
                duration: Some(30),
            },
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded: ClientFrame = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_server_frame_roundtrip() {
        let frames = vec![
            ServerFrame::connected(7, "user-1", 1, 30000),
            ServerFrame::NewMessage {
                message_id: "msg-1".to_string(),
                sender: UserSummary::new("user-2", "Bob"),
            },
            ServerFrame::GroupMessageDelivered {
                message_id: "msg-2".to_string(),
                group_id: "group-7".to_string(),
                delivered_to: vec!["user-3".to_string(), "user-4".to_string()],
            },
            ServerFrame::typing_status("user-2", false),
            ServerFrame::error("GroupNotFound"),
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded: ServerFrame = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = ClientFrame::typing("user-2", true);
        let encoded = encode(&frame).unwrap();

        // Test with partial data
        let partial = &encoded[..5];
        match decode::<ClientFrame>(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_event_rejected() {
        // A frame whose tag names an event this protocol does not define.
        #[derive(serde::Serialize)]
        #[serde(tag = "type")]
        enum Bogus {
            #[serde(rename = "self_destruct")]
            SelfDestruct { code: u32 },
        }

        let encoded = encode(&Bogus::SelfDestruct { code: 4 }).unwrap();
        assert!(matches!(
            decode::<ClientFrame>(&encoded),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = ClientFrame::typing("user-2", true);
        let frame2 = ClientFrame::send_private("msg-1", "user-2");

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        let decoded1: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientFrame = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);
        assert!(decode_from::<ClientFrame>(&mut buf).unwrap().is_none());
    }
}
