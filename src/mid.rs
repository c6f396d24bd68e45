//! Message identification (C1): message-type codes and the 7-byte MID.

use crate::address::NodeAddr;
use crate::clock::random_tag;
use crate::error::MeshError;
use rand::Rng;

pub const MID_LEN: usize = 7;

/// ASCII message-type codes, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    NeighborBeacon,
    ShortestPathAnnounce,
    Heartbeat,
    BeginOfChunks,
    ChunkItem,
    EndOfChunks,
    Acknowledgement,
    ValidateNeighbor,
    EventText,
}

impl MessageType {
    pub const fn code(self) -> u8 {
        match self {
            MessageType::NeighborBeacon => b'N',
            MessageType::ShortestPathAnnounce => b'S',
            MessageType::Heartbeat => b'H',
            MessageType::BeginOfChunks => b'B',
            MessageType::ChunkItem => b'I',
            MessageType::EndOfChunks => b'E',
            MessageType::Acknowledgement => b'A',
            MessageType::ValidateNeighbor => b'V',
            MessageType::EventText => b'T',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'N' => MessageType::NeighborBeacon,
            b'S' => MessageType::ShortestPathAnnounce,
            b'H' => MessageType::Heartbeat,
            b'B' => MessageType::BeginOfChunks,
            b'I' => MessageType::ChunkItem,
            b'E' => MessageType::EndOfChunks,
            b'A' => MessageType::Acknowledgement,
            b'V' => MessageType::ValidateNeighbor,
            b'T' => MessageType::EventText,
            _ => return None,
        })
    }

    /// Whether this type requires an ACK to be considered delivered, per
    /// the reliability column of §3's message-type table.
    pub const fn needs_ack(self) -> bool {
        matches!(
            self,
            MessageType::Heartbeat | MessageType::BeginOfChunks | MessageType::EndOfChunks | MessageType::ValidateNeighbor | MessageType::EventText
        )
    }

    /// Whether this type is ever sent as a broadcast (receiver byte `'*'`).
    pub const fn is_broadcast_type(self) -> bool {
        matches!(self, MessageType::NeighborBeacon)
    }
}

/// The 7-byte message identifier described in §3: type, creator, sender,
/// receiver, 3-letter random tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub msg_type: MessageType,
    pub creator: NodeAddr,
    pub sender: NodeAddr,
    pub receiver: NodeAddr,
    pub tag: [u8; 3],
}

impl MessageId {
    /// Assembles a MID with a fresh random tag, as `send_single` does for
    /// every transmit attempt and as a forwarding node does for every
    /// re-sent frame (sender/tag are always fresh on forward; creator is
    /// preserved).
    pub fn fresh<R: Rng + ?Sized>(rng: &mut R, msg_type: MessageType, creator: NodeAddr, sender: NodeAddr, receiver: NodeAddr) -> Self {
        MessageId {
            msg_type,
            creator,
            sender,
            receiver,
            tag: random_tag(rng),
        }
    }

    pub fn to_bytes(self) -> [u8; MID_LEN] {
        [
            self.msg_type.code(),
            self.creator,
            self.sender,
            self.receiver,
            self.tag[0],
            self.tag[1],
            self.tag[2],
        ]
    }

    /// Parses a 7-byte MID. Validates the type code and that the tag bytes
    /// are uppercase letters; addresses are accepted as arbitrary octets
    /// (per §4.1, "addresses are arbitrary octets").
    pub fn from_bytes(buf: &[u8]) -> Result<Self, MeshError> {
        if buf.len() < MID_LEN {
            return Err(MeshError::ParseError {
                len: buf.len(),
                reason: "buffer shorter than MID",
            });
        }
        let msg_type = MessageType::from_code(buf[0]).ok_or(MeshError::ParseError {
            len: buf.len(),
            reason: "unrecognized message-type code",
        })?;
        let tag = [buf[4], buf[5], buf[6]];
        if !tag.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(MeshError::ParseError {
                len: buf.len(),
                reason: "tag bytes are not uppercase letters",
            });
        }
        Ok(MessageId {
            msg_type,
            creator: buf[1],
            sender: buf[2],
            receiver: buf[3],
            tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn round_trips_through_bytes() {
        let mut rng = StdRng::seed_from_u64(1);
        let mid = MessageId::fresh(&mut rng, MessageType::Heartbeat, 10, 11, 12);
        let bytes = mid.to_bytes();
        let parsed = MessageId::from_bytes(&bytes).unwrap();
        assert_eq!(mid, parsed);
    }

    #[test]
    fn broadcast_receiver_is_star_byte() {
        let mut rng = StdRng::seed_from_u64(2);
        let mid = MessageId::fresh(&mut rng, MessageType::NeighborBeacon, 5, 5, crate::address::BROADCAST);
        assert_eq!(mid.to_bytes()[3], b'*');
    }

    #[test]
    fn rejects_unknown_type_code() {
        let mut buf = [b'Z', 1, 2, 3, b'A', b'B', b'C'];
        assert!(MessageId::from_bytes(&buf).is_err());
        buf[0] = b'H';
        assert!(MessageId::from_bytes(&buf).is_ok());
    }

    #[test]
    fn rejects_lowercase_tag() {
        let buf = [b'H', 1, 2, 3, b'a', b'B', b'C'];
        assert!(MessageId::from_bytes(&buf).is_err());
    }

    #[test]
    fn reliability_matches_spec_table() {
        assert!(MessageType::Heartbeat.needs_ack());
        assert!(MessageType::BeginOfChunks.needs_ack());
        assert!(MessageType::EndOfChunks.needs_ack());
        assert!(MessageType::ValidateNeighbor.needs_ack());
        assert!(MessageType::EventText.needs_ack());
        assert!(!MessageType::NeighborBeacon.needs_ack());
        assert!(!MessageType::ShortestPathAnnounce.needs_ack());
        assert!(!MessageType::ChunkItem.needs_ack());
        assert!(!MessageType::Acknowledgement.needs_ack());
    }
}
