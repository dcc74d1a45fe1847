//! Packet framing
//!
//! Every logical message travels as one or more physical packets, each with a
//! 3-byte little-endian payload length and a 1-byte sequence number. A payload
//! of `MAX_PACKET_PAYLOAD` bytes means "more follows"; the message ends with the
//! first shorter packet, which is zero-length when the logical payload is an
//! exact multiple of the maximum.

use super::constants::{HEADER_SIZE, MAX_PACKET_PAYLOAD};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;

/// Header of one physical packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (at most `MAX_PACKET_PAYLOAD`)
    pub length: usize,
    /// Sequence number, wraps at 256
    pub sequence: u8,
}

impl PacketHeader {
    /// Parse a header from the first four bytes of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let length = u32::from_le_bytes([data[0], data[1], data[2], 0]) as usize;
        Some(Self {
            length,
            sequence: data[3],
        })
    }

    /// Append the encoded header to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.length <= MAX_PACKET_PAYLOAD);
        let len = self.length as u32;
        buf.put_u8((len & 0xFF) as u8);
        buf.put_u8(((len >> 8) & 0xFF) as u8);
        buf.put_u8(((len >> 16) & 0xFF) as u8);
        buf.put_u8(self.sequence);
    }
}

/// Frame a logical payload into physical packets
///
/// `sequence` is the number for the first packet and is left pointing at the
/// next unused value.
pub fn write_packets(buf: &mut BytesMut, payload: &[u8], sequence: &mut u8) {
    let mut remaining = payload;
    buf.reserve(payload.len() + HEADER_SIZE * (payload.len() / MAX_PACKET_PAYLOAD + 1));
    loop {
        let chunk_len = remaining.len().min(MAX_PACKET_PAYLOAD);
        PacketHeader {
            length: chunk_len,
            sequence: *sequence,
        }
        .encode(buf);
        buf.put_slice(&remaining[..chunk_len]);
        *sequence = sequence.wrapping_add(1);
        remaining = &remaining[chunk_len..];
        if chunk_len < MAX_PACKET_PAYLOAD {
            break;
        }
    }
}

/// Try to take one complete logical message off the front of `data`
///
/// Returns `Ok(None)` (consuming nothing) while the terminating packet has not
/// arrived yet. On success `sequence` holds the number expected for the next
/// packet from the server.
pub fn take_message(data: &mut BytesMut, sequence: &mut u8) -> io::Result<Option<Bytes>> {
    let mut offset = 0;
    let mut total = 0;
    let mut count = 0usize;
    let mut expected = *sequence;
    loop {
        let Some(header) = PacketHeader::parse(&data[offset..]) else {
            return Ok(None);
        };
        if header.sequence != expected {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "packet sequence mismatch: expected {}, got {}",
                    expected, header.sequence
                ),
            ));
        }
        if data.len() < offset + HEADER_SIZE + header.length {
            return Ok(None);
        }
        offset += HEADER_SIZE + header.length;
        total += header.length;
        count += 1;
        expected = expected.wrapping_add(1);
        if header.length < MAX_PACKET_PAYLOAD {
            break;
        }
    }

    *sequence = expected;
    if count == 1 {
        data.advance(HEADER_SIZE);
        return Ok(Some(data.split_to(total).freeze()));
    }

    let mut payload = BytesMut::with_capacity(total);
    for _ in 0..count {
        let length = PacketHeader::parse(data).map(|h| h.length).unwrap_or(0);
        data.advance(HEADER_SIZE);
        payload.put_slice(&data[..length]);
        data.advance(length);
    }
    Ok(Some(payload.freeze()))
}
