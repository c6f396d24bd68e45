//! Frame codec (C4): `MID ‖ ';' ‖ payload`, with newline-escape at the
//! radio boundary.
//!
//! Grounded on `netrajaal/main.py`'s `parse_header`: a fixed 7-byte header,
//! a literal `;` delimiter, and a newline escape applied only at the wire
//! boundary because the physical radio treats `\n` as a record terminator.

use crate::error::MeshError;
use crate::mid::{MID_LEN, MessageId};

/// Maximum size of a frame after newline-escape, on the wire.
pub const MAX_WIRE_LEN: usize = 254;

const DELIMITER: u8 = b';';
const NEWLINE: u8 = 0x0A;
const ESCAPE_SEQUENCE: &[u8; 4] = b"{}[]";

/// Encodes `(mid, payload)` into a wire-ready, newline-escaped frame.
/// Fails with `FrameTooLarge` if the escaped result would exceed
/// `MAX_WIRE_LEN`.
pub fn encode(mid: MessageId, payload: &[u8]) -> Result<Vec<u8>, MeshError> {
    let mut raw = Vec::with_capacity(MID_LEN + 1 + payload.len());
    raw.extend_from_slice(&mid.to_bytes());
    raw.push(DELIMITER);
    raw.extend_from_slice(payload);

    let escaped = escape_newlines(&raw);
    if escaped.len() > MAX_WIRE_LEN {
        return Err(MeshError::FrameTooLarge {
            len: escaped.len(),
            max: MAX_WIRE_LEN,
        });
    }
    Ok(escaped)
}

/// Decodes a wire frame: reverses the newline-escape, validates the
/// header, and splits off the payload. No partial parse is ever returned;
/// any structural problem yields `Err`.
pub fn decode(wire: &[u8]) -> Result<(MessageId, Vec<u8>), MeshError> {
    let raw = unescape_newlines(wire);
    if raw.len() < MID_LEN + 1 {
        return Err(MeshError::ParseError {
            len: raw.len(),
            reason: "frame shorter than header + delimiter",
        });
    }
    if raw[MID_LEN] != DELIMITER {
        return Err(MeshError::ParseError {
            len: raw.len(),
            reason: "missing ';' delimiter at offset 7",
        });
    }
    let mid = MessageId::from_bytes(&raw[..MID_LEN])?;
    let payload = raw[MID_LEN + 1..].to_vec();
    Ok((mid, payload))
}

fn escape_newlines(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    for &b in raw {
        if b == NEWLINE {
            out.extend_from_slice(ESCAPE_SEQUENCE);
        } else {
            out.push(b);
        }
    }
    out
}

fn unescape_newlines(wire: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.len());
    let mut i = 0;
    while i < wire.len() {
        if wire[i..].starts_with(ESCAPE_SEQUENCE) {
            out.push(NEWLINE);
            i += ESCAPE_SEQUENCE.len();
        } else {
            out.push(wire[i]);
            i += 1;
        }
    }
    out
}
