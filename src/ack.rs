//! Ack tracker (C5): correlates outgoing unacked messages with inbound
//! `A` frames (§4.2).
//!
//! Grounded directly on §4.2, with the scan-and-match shape borrowed
//! from `common::connection_matrix::ConnectionMatrixParser::handle_line`
//! (a stateless-per-call parser over a line of accumulated state).

use crate::buffers::BoundedLog;
use crate::mid::{MID_LEN, MessageId, MessageType};

/// Sentinel that means "the sender's End-of-chunks is fully satisfied",
/// per §4.2 and §4.4.
pub const FULLY_DELIVERED_SENTINEL: &str = "-1";

/// Result of looking up whether `target` has been acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckLookup {
    /// No matching `A` frame has been logged yet.
    NotYetAcked,
    /// Acknowledged. `missing` is empty when the ACK carried no indices or
    /// the `-1` sentinel.
    Acked { missing: Vec<u16> },
}

/// Scans `recd` newest-first for an `A` frame whose payload begins with
/// `target`'s 7 MID bytes (§4.2 leniency: a payload one byte shorter than
/// the MID, due to a recurring radio truncation bug, still counts as a
/// match on the bytes present).
pub fn lookup_ack(recd: &BoundedLog, target: MessageId) -> AckLookup {
    let target_bytes = target.to_bytes();
    for entry in recd.iter_newest_first() {
        if entry.mid.msg_type != MessageType::Acknowledgement {
            continue;
        }
        let payload = &entry.payload;
        if payload.len() < MID_LEN - 1 {
            continue;
        }
        let match_len = payload.len().min(MID_LEN);
        if payload[..match_len] != target_bytes[..match_len] {
            continue;
        }
        return AckLookup::Acked { missing: parse_missing(payload) };
    }
    AckLookup::NotYetAcked
}

/// Parses the optional `":<csv-indices>"` or `":-1"` suffix following the
/// MID bytes in an ACK payload.
fn parse_missing(payload: &[u8]) -> Vec<u16> {
    let mid_len = payload.len().min(MID_LEN);
    let rest = &payload[mid_len..];
    if rest.is_empty() || rest[0] != b':' {
        return Vec::new();
    }
    let csv = String::from_utf8_lossy(&rest[1..]);
    let csv = csv.trim();
    if csv == FULLY_DELIVERED_SENTINEL || csv.is_empty() {
        return Vec::new();
    }
    csv.split(',').filter_map(|s| s.trim().parse::<u16>().ok()).collect()
}

/// Builds the payload for an ACK frame per §4.2/§4.4's grammar: the MID
/// bytes, optionally followed by `:-1` or `:i0,i1,...`.
pub fn build_ack_payload(target: MessageId, missing: &[u16]) -> Vec<u8> {
    let mut out = target.to_bytes().to_vec();
    if missing.is_empty() {
        out.extend_from_slice(format!(":{FULLY_DELIVERED_SENTINEL}").as_bytes());
    } else {
        let csv = missing.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        out.push(b':');
        out.extend_from_slice(csv.as_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::LoggedMessage;
    use embassy_time::Instant;

    fn ack_mid() -> MessageId {
        MessageId {
            msg_type: MessageType::Acknowledgement,
            creator: 2,
            sender: 2,
            receiver: 1,
            tag: [b'X', b'Y', b'Z'],
        }
    }

    fn target() -> MessageId {
        MessageId {
            msg_type: MessageType::Heartbeat,
            creator: 1,
            sender: 1,
            receiver: 2,
            tag: [b'A', b'B', b'C'],
        }
    }

    #[test]
    fn not_yet_acked_on_empty_log() {
        let recd = BoundedLog::new(10);
        assert_eq!(lookup_ack(&recd, target()), AckLookup::NotYetAcked);
    }

    #[test]
    fn finds_full_delivery_ack() {
        let mut recd = BoundedLog::new(10);
        let payload = build_ack_payload(target(), &[]);
        recd.push(LoggedMessage {
            mid: ack_mid(),
            payload,
            at: Instant::from_millis(0),
        });
        assert_eq!(lookup_ack(&recd, target()), AckLookup::Acked { missing: vec![] });
    }

    #[test]
    fn finds_partial_missing_list() {
        let mut recd = BoundedLog::new(10);
        let payload = build_ack_payload(target(), &[1, 3, 7]);
        recd.push(LoggedMessage {
            mid: ack_mid(),
            payload,
            at: Instant::from_millis(0),
        });
        assert_eq!(lookup_ack(&recd, target()), AckLookup::Acked { missing: vec![1, 3, 7] });
    }

    #[test]
    fn tolerates_one_byte_truncated_mid() {
        let mut recd = BoundedLog::new(10);
        let mut payload = target().to_bytes().to_vec();
        payload.truncate(MID_LEN - 1); // simulate the recurring radio truncation
        recd.push(LoggedMessage {
            mid: ack_mid(),
            payload,
            at: Instant::from_millis(0),
        });
        assert_eq!(lookup_ack(&recd, target()), AckLookup::Acked { missing: vec![] });
    }

    #[test]
    fn ignores_non_ack_frames_and_mismatched_mid() {
        let mut recd = BoundedLog::new(10);
        recd.push(LoggedMessage {
            mid: target(),
            payload: vec![],
            at: Instant::from_millis(0),
        });
        let mut other = ack_mid();
        other.tag = [b'Q', b'Q', b'Q'];
        let mut wrong_target = target();
        wrong_target.creator = 9;
        recd.push(LoggedMessage {
            mid: other,
            payload: build_ack_payload(wrong_target, &[]),
            at: Instant::from_millis(1),
        });
        assert_eq!(lookup_ack(&recd, target()), AckLookup::NotYetAcked);
    }

    #[test]
    fn newest_first_prefers_latest_ack() {
        let mut recd = BoundedLog::new(10);
        recd.push(LoggedMessage {
            mid: ack_mid(),
            payload: build_ack_payload(target(), &[1]),
            at: Instant::from_millis(0),
        });
        recd.push(LoggedMessage {
            mid: ack_mid(),
            payload: build_ack_payload(target(), &[]),
            at: Instant::from_millis(10),
        });
        assert_eq!(lookup_ack(&recd, target()), AckLookup::Acked { missing: vec![] });
    }
}
