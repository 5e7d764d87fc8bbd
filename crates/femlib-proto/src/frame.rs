//! Wire envelope encoder/decoder.
//!
//! The bus carries fixed-size addressed frames in one of two envelopes,
//! depending on how the bus is reached:
//!
//! # Gateway envelope (36 bytes)
//!
//! Used by the Ethernet gateway and forwarded verbatim by the relay daemon:
//!
//! ```text
//! length:u16  type:u16  reserved:12B  timestamp:u32
//! channel:u8  dlc:u16  flags:u8  id:u32  payload:8B
//! ```
//!
//! `length` counts the bytes after itself (always 34). `dlc` is the number
//! of meaningful payload bytes; the payload field is always padded to 8.
//!
//! # Direct envelope (16 bytes)
//!
//! Used on the direct bus-adapter socket:
//!
//! ```text
//! id:u32  dlc:u8  pad:3B  payload:8B
//! ```
//!
//! # Arbitration id
//!
//! Both envelopes share the 32-bit extended arbitration id:
//! extended-frame flag (bit 31) | `(node_id + 1) << 18` | RCA (18 bits).
//! All integers are big-endian on the wire.

use bytes::{Buf, BufMut, BytesMut};

use femlib_core::{Error, Frame, Result, MAX_PAYLOAD};

/// Total size of the gateway envelope.
pub const GATEWAY_ENVELOPE_LEN: usize = 36;

/// Total size of the direct envelope.
pub const DIRECT_ENVELOPE_LEN: usize = 16;

/// Value of the gateway `length` field (bytes following it).
const GATEWAY_BODY_LEN: u16 = 34;

/// Gateway `type` field for a data frame.
pub const GATEWAY_TYPE_DATA: u16 = 0x0002;

/// Extended-frame flag in the arbitration id.
pub const EXTENDED_FLAG: u32 = 0x8000_0000;

/// Bit position of the node id within the arbitration id.
const NODE_SHIFT: u32 = 18;

/// Mask covering the 18-bit RCA portion of the arbitration id.
const RCA_MASK: u32 = (1 << NODE_SHIFT) - 1;

/// Pack a node id and RCA into a 32-bit extended arbitration id.
///
/// The node occupies bits 18.. as `(node_id + 1)`; the RCA the low 18 bits.
pub fn arbitration_id(node_id: u8, rca: u32) -> u32 {
    EXTENDED_FLAG | (u32::from(node_id) + 1) << NODE_SHIFT | (rca & RCA_MASK)
}

/// Split an arbitration id back into `(node_id, rca)`.
///
/// Fails if the node field is zero (no node encodes as zero on the wire).
pub fn split_arbitration_id(id: u32) -> Result<(u8, u32)> {
    let node_plus_one = (id & !EXTENDED_FLAG) >> NODE_SHIFT;
    if node_plus_one == 0 {
        return Err(Error::Protocol(format!(
            "arbitration id {id:#010x} has a zero node field"
        )));
    }
    Ok(((node_plus_one - 1) as u8, id & RCA_MASK))
}

/// Encode a frame into the 36-byte gateway envelope.
pub fn encode_gateway(node_id: u8, frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(GATEWAY_ENVELOPE_LEN);
    buf.put_u16(GATEWAY_BODY_LEN);
    buf.put_u16(GATEWAY_TYPE_DATA);
    buf.put_slice(&[0u8; 12]); // reserved
    buf.put_u32(0); // timestamp, filled in by the gateway
    buf.put_u8(0); // channel
    buf.put_u16(frame.data().len() as u16);
    buf.put_u8(0); // flags
    buf.put_u32(arbitration_id(node_id, frame.rca()));
    let mut payload = [0u8; MAX_PAYLOAD];
    payload[..frame.data().len()].copy_from_slice(frame.data());
    buf.put_slice(&payload);
    buf.to_vec()
}

/// Decode one 36-byte gateway envelope into `(node_id, frame)`.
pub fn decode_gateway(bytes: &[u8]) -> Result<(u8, Frame)> {
    if bytes.len() < GATEWAY_ENVELOPE_LEN {
        return Err(Error::Protocol(format!(
            "short gateway envelope: {} of {GATEWAY_ENVELOPE_LEN} bytes",
            bytes.len()
        )));
    }
    let mut buf = &bytes[..GATEWAY_ENVELOPE_LEN];
    let length = buf.get_u16();
    if length != GATEWAY_BODY_LEN {
        return Err(Error::Protocol(format!(
            "gateway envelope length field {length}, expected {GATEWAY_BODY_LEN}"
        )));
    }
    let _type = buf.get_u16();
    buf.advance(12); // reserved
    let _timestamp = buf.get_u32();
    let _channel = buf.get_u8();
    let dlc = buf.get_u16();
    let _flags = buf.get_u8();
    let id = buf.get_u32();
    if dlc as usize > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("gateway envelope dlc {dlc} exceeds 8")));
    }
    let (node_id, rca) = split_arbitration_id(id)?;
    let frame = Frame::new(rca, &buf[..dlc as usize])?;
    Ok((node_id, frame))
}

/// Encode a frame into the 16-byte direct envelope.
pub fn encode_direct(node_id: u8, frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(DIRECT_ENVELOPE_LEN);
    buf.put_u32(arbitration_id(node_id, frame.rca()));
    buf.put_u8(frame.data().len() as u8);
    buf.put_slice(&[0u8; 3]); // pad
    let mut payload = [0u8; MAX_PAYLOAD];
    payload[..frame.data().len()].copy_from_slice(frame.data());
    buf.put_slice(&payload);
    buf.to_vec()
}

/// Decode one 16-byte direct envelope into `(node_id, frame)`.
pub fn decode_direct(bytes: &[u8]) -> Result<(u8, Frame)> {
    if bytes.len() < DIRECT_ENVELOPE_LEN {
        return Err(Error::Protocol(format!(
            "short direct envelope: {} of {DIRECT_ENVELOPE_LEN} bytes",
            bytes.len()
        )));
    }
    let mut buf = &bytes[..DIRECT_ENVELOPE_LEN];
    let id = buf.get_u32();
    let dlc = buf.get_u8();
    buf.advance(3); // pad
    if dlc as usize > MAX_PAYLOAD {
        return Err(Error::Protocol(format!("direct envelope dlc {dlc} exceeds 8")));
    }
    let (node_id, rca) = split_arbitration_id(id)?;
    let frame = Frame::new(rca, &buf[..dlc as usize])?;
    Ok((node_id, frame))
}
