//! Length-prefixed framing for protocol packets.
//!
//! A frame is a little-endian `u16` payload length followed by exactly that
//! many bytes of UTF-8 JSON describing one packet. The 16-bit prefix bounds
//! a single frame; oversized packets are a caller error and fail before any
//! bytes are framed.

use crate::error::NetError;
use crate::packet::Packet;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest payload a frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Serializes a packet into a complete frame (prefix + payload).
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, NetError> {
    let payload =
        serde_json::to_vec(packet).map_err(|e| NetError::Protocol(e.to_string()))?;
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(NetError::PacketTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Deserializes one frame payload into a packet.
///
/// The tagged `PacketBody` enum is the exhaustive decode table: an
/// unrecognized `kind`, or any malformed payload, yields a `Protocol` error
/// for the caller to drop.
pub fn decode_payload(payload: &[u8]) -> Result<Packet, NetError> {
    serde_json::from_slice(payload).map_err(|e| NetError::Protocol(e.to_string()))
}
