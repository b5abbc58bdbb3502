//! Packet encapsulation: magic-marker framing, resynchronization and the
//! nested-length shim used by bulk payloads.
//!
//! On the wire a packet is `marker(4) ∥ payload_len+2(4, LE) ∥
//! response_code(1) ∥ message_type(1) ∥ body`. The marker differs by
//! direction so a desynchronized scanner cannot lock onto its own echo.

use sinc_proto::MessageType;
use tracing::debug;

use crate::buffer::SincBuffer;

/// Marker on client→device packets.
pub(crate) const COMMAND_MARKER: u32 = 0x88E7_D5C6;
/// Marker on device→client packets (and synthesized datagram headers).
pub(crate) const RESPONSE_MARKER: u32 = 0x87D6_C4B5;

pub(crate) const HEADER_LEN: usize = 10;
/// Header bytes not covered by the length field.
const SHORT_HEADER_LEN: usize = HEADER_LEN - 2;
/// Ordinary protobuf-carried messages use this response code.
const RESPONSE_CODE_PROTOBUF: u8 = 3;
/// Lengths above this are treated as stream corruption.
const MAX_PACKET_SIZE: u32 = 256 * 1024 * 1024;

/// Result of scanning a receive buffer for one packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scan {
    /// A complete packet. `discard` bytes of noise/foreign packets precede
    /// it; its body is `buf[body_start..body_start + body_len]` and the
    /// packet ends at `body_start + body_len`.
    Packet { discard: usize, body_start: usize, body_len: usize, msg_type: MessageType, skipped: u32 },
    /// No complete packet yet. `discard` bytes at the front can never start
    /// one and may be dropped.
    Incomplete { discard: usize, skipped: u32 },
}

/// Write a framed-packet header in place. `header` must be 10 bytes.
pub(crate) fn write_header(header: &mut [u8], payload_len: usize, msg_type: u8, marker: u32) {
    header[0..4].copy_from_slice(&marker.to_le_bytes());
    header[4..8].copy_from_slice(&(payload_len as u32 + 2).to_le_bytes());
    header[8] = RESPONSE_CODE_PROTOBUF;
    header[9] = msg_type;
}

/// Append a framed-packet header for a client→device command.
pub(crate) fn encode_header(buf: &mut SincBuffer, payload_len: usize, msg_type: MessageType) {
    let mut header = [0u8; HEADER_LEN];
    write_header(&mut header, payload_len, msg_type.as_wire(), COMMAND_MARKER);
    buf.append(&header);
}

fn find_marker(window: &[u8], marker: &[u8; 4]) -> Option<usize> {
    window.windows(4).position(|w| w == marker)
}

/// Scan `buf` for the next complete packet with the given marker.
///
/// Never consumes anything itself; callers drain according to the returned
/// offsets (peeking callers drain nothing). Corruption is self-healing: an
/// implausible length drops the 4 marker bytes and rescans, a marker-less
/// buffer is discardable except for its last 3 bytes (a marker may straddle
/// the tail).
pub(crate) fn scan(buf: &[u8], marker: u32) -> Scan {
    let marker_bytes = marker.to_le_bytes();
    let mut pos = 0;
    let mut skipped = 0u32;

    loop {
        let window = &buf[pos..];
        if window.len() < SHORT_HEADER_LEN {
            return Scan::Incomplete { discard: pos, skipped };
        }

        let Some(found) = find_marker(window, &marker_bytes) else {
            let keep = window.len().min(3);
            return Scan::Incomplete { discard: pos + window.len() - keep, skipped };
        };

        if window.len() - found < SHORT_HEADER_LEN {
            // Marker near the tail; keep everything until the header is in.
            return Scan::Incomplete { discard: pos, skipped };
        }

        if found > 0 {
            debug!(bytes = found, "dropping noise ahead of packet marker");
        }
        pos += found;
        let hdr = &buf[pos..];

        let payload_len = u32::from_le_bytes(hdr[4..8].try_into().unwrap());
        if payload_len == 0 || payload_len > MAX_PACKET_SIZE {
            // Corrupt length: skip past this marker and resynchronize.
            debug!(payload_len, "implausible payload length, resyncing");
            pos += 4;
            continue;
        }

        let payload_len = payload_len as usize;
        if hdr.len() - SHORT_HEADER_LEN < payload_len {
            return Scan::Incomplete { discard: pos, skipped };
        }

        let response_code = hdr[8];
        if response_code != RESPONSE_CODE_PROTOBUF {
            debug!(response_code, len = payload_len, "skipping foreign packet");
            skipped += 1;
            pos += payload_len + SHORT_HEADER_LEN;
            continue;
        }

        return Scan::Packet {
            discard: pos,
            body_start: pos + HEADER_LEN,
            body_len: payload_len - 2,
            msg_type: MessageType::from_wire(hdr[9]),
            skipped,
        };
    }
}

/// Read the nested length that prefixes bulk payload bodies: two bytes LE,
/// or `0xFFFF` followed by the real four-byte length. Returns the length and
/// the offset at which the nested data starts.
pub(crate) fn read_nested_len(body: &[u8]) -> Option<(usize, usize)> {
    if body.len() < 2 {
        return None;
    }
    let short = u16::from_le_bytes(body[..2].try_into().unwrap());
    if short == 0xFFFF {
        if body.len() < 6 {
            return None;
        }
        Some((u32::from_le_bytes(body[2..6].try_into().unwrap()) as usize, 6))
    } else {
        Some((short as usize, 2))
    }
}

/// Append a framed-packet header for a device→client response. Used when
/// synthesizing reply packets on behalf of a device (aggregators, test
/// peers).
pub(crate) fn encode_response_header(buf: &mut SincBuffer, payload_len: usize, msg_type: MessageType) {
    let mut header = [0u8; HEADER_LEN];
    write_header(&mut header, payload_len, msg_type.as_wire(), RESPONSE_MARKER);
    buf.append(&header);
}
