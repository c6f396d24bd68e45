//! Chunker / reassembler (C7, §4.4): splits a blob into ≤200-byte items on
//! the sender side, tracks a sparse per-`img_id` context and reassembles on
//! the receiver side.
//!
//! The async burst (Begin → N×Item → End, with selective-repeat retries
//! and transmit-lock handling) lives on `Node`; this module holds the
//! parts that don't need an executor: splitting, wire encoding of chunk
//! items and the Begin/End text bodies, and the reassembly table itself.
//!
//! Grounded on `netrajaal/main.py`'s `make_chunks`/chunk-context handling
//! for the wire shapes, and on `other_examples/.../tock__capsules-src-net-lowpan_fragment.rs`'s
//! `RxState` sparse-reassembly-by-index shape for `ChunkContext`.

use crate::address::NodeAddr;
use crate::error::MeshError;
use embassy_time::{Duration, Instant};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Maximum payload bytes per chunk item, leaving headroom under the
/// 254-byte wire cap once the MID, delimiter, 3-byte img_id and 2-byte
/// index are accounted for (§4.4 step 2, §8 boundary behavior).
pub const CHUNK_PAYLOAD_MAX: usize = 200;

/// Chunk contexts are bounded just like the traffic logs (§3).
pub const MAX_CHUNK_CONTEXTS: usize = 50;

/// A chunk context is evicted if it sits open this long without
/// completing (mirrors the transmit-lock watchdog of §4.5, applied to the
/// receiver side so a stalled sender can't pin memory forever).
pub const CONTEXT_MAX_AGE: Duration = Duration::from_secs(180);

/// Maximum selective-repeat retransmission rounds on the sender side
/// (§4.4 step 4).
pub const MAX_RETRANSMIT_ROUNDS: u32 = 20;

pub type ImgId = [u8; 3];

/// Splits `blob` into `CHUNK_PAYLOAD_MAX`-byte (or smaller, for the last
/// one) pieces, in order. An empty blob still yields exactly one (empty)
/// chunk, since Begin always declares at least one.
pub fn split_into_chunks(blob: &[u8]) -> Vec<&[u8]> {
    if blob.is_empty() {
        return vec![&blob[0..0]];
    }
    blob.chunks(CHUNK_PAYLOAD_MAX).collect()
}

/// Encodes one `I` frame payload: `img_id(3) ‖ index(2, BE) ‖ bytes`.
pub fn encode_chunk_item(img_id: ImgId, index: u16, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + bytes.len());
    out.extend_from_slice(&img_id);
    out.extend_from_slice(&index.to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Decodes an `I` frame payload back into its parts.
pub fn decode_chunk_item(payload: &[u8]) -> Result<(ImgId, u16, &[u8]), MeshError> {
    if payload.len() < 5 {
        return Err(MeshError::ParseError {
            len: payload.len(),
            reason: "chunk item shorter than img_id + index header",
        });
    }
    let img_id: ImgId = [payload[0], payload[1], payload[2]];
    let index = u16::from_be_bytes([payload[3], payload[4]]);
    Ok((img_id, index, &payload[5..]))
}

/// Encodes a `B` frame body: `"<img_id>:<epoch_ms>:<count>"`, with
/// `img_id` written as its three literal ASCII tag characters.
pub fn encode_begin_payload(img_id: ImgId, epoch_ms: u64, count: u16) -> Vec<u8> {
    format!("{}{}{}:{}:{}", img_id[0] as char, img_id[1] as char, img_id[2] as char, epoch_ms, count).into_bytes()
}

/// Decodes a `B` frame body back into `(img_id, epoch_ms, count)`.
pub fn decode_begin_payload(payload: &[u8]) -> Result<(ImgId, u64, u16), MeshError> {
    let text = std::str::from_utf8(payload).map_err(|_| MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload is not valid utf-8",
    })?;
    let mut parts = text.splitn(3, ':');
    let id_part = parts.next().ok_or(MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload missing img_id",
    })?;
    let epoch_part = parts.next().ok_or(MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload missing epoch_ms",
    })?;
    let count_part = parts.next().ok_or(MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload missing count",
    })?;
    let id_bytes = id_part.as_bytes();
    if id_bytes.len() != 3 {
        return Err(MeshError::ParseError {
            len: payload.len(),
            reason: "begin payload img_id is not 3 bytes",
        });
    }
    let img_id: ImgId = [id_bytes[0], id_bytes[1], id_bytes[2]];
    let epoch_ms = epoch_part.parse::<u64>().map_err(|_| MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload epoch_ms is not a valid integer",
    })?;
    let count = count_part.parse::<u16>().map_err(|_| MeshError::ParseError {
        len: payload.len(),
        reason: "begin payload count is not a valid integer",
    })?;
    Ok((img_id, epoch_ms, count))
}

/// Encodes an `E` frame body: `"<img_id>:<epoch_ms>"`.
pub fn encode_end_payload(img_id: ImgId, epoch_ms: u64) -> Vec<u8> {
    format!("{}{}{}:{}", img_id[0] as char, img_id[1] as char, img_id[2] as char, epoch_ms).into_bytes()
}

pub fn decode_end_payload(payload: &[u8]) -> Result<(ImgId, u64), MeshError> {
    let text = std::str::from_utf8(payload).map_err(|_| MeshError::ParseError {
        len: payload.len(),
        reason: "end payload is not valid utf-8",
    })?;
    let mut parts = text.splitn(2, ':');
    let id_part = parts.next().ok_or(MeshError::ParseError {
        len: payload.len(),
        reason: "end payload missing img_id",
    })?;
    let epoch_part = parts.next().ok_or(MeshError::ParseError {
        len: payload.len(),
        reason: "end payload missing epoch_ms",
    })?;
    let id_bytes = id_part.as_bytes();
    if id_bytes.len() != 3 {
        return Err(MeshError::ParseError {
            len: payload.len(),
            reason: "end payload img_id is not 3 bytes",
        });
    }
    let img_id: ImgId = [id_bytes[0], id_bytes[1], id_bytes[2]];
    let epoch_ms = epoch_part.parse::<u64>().map_err(|_| MeshError::ParseError {
        len: payload.len(),
        reason: "end payload epoch_ms is not a valid integer",
    })?;
    Ok((img_id, epoch_ms))
}

/// Receiver-side reassembly state for one `img_id` (§3's "Chunk context").
pub struct ChunkContext {
    pub creator: NodeAddr,
    pub expected_count: u16,
    pub received: BTreeMap<u16, Vec<u8>>,
    pub opened_at: Instant,
}

impl ChunkContext {
    fn missing(&self) -> Vec<u16> {
        (0..self.expected_count).filter(|i| !self.received.contains_key(i)).collect()
    }

    fn is_complete(&self) -> bool {
        self.received.len() as u16 >= self.expected_count
    }

    fn reassemble(&self) -> Vec<u8> {
        self.received.values().flat_map(|b| b.iter().copied()).collect()
    }
}

/// Result of processing an inbound Begin frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// A fresh context was created.
    Opened,
    /// Matched an already-open context with the same creator/count; no-op
    /// per §4.4's idempotent-duplicate-Begin rule.
    DuplicateIgnored,
}

/// Bounded table of open chunk contexts, keyed by `img_id`.
#[derive(Default)]
pub struct ReassemblyTable {
    contexts: HashMap<ImgId, ChunkContext>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        ReassemblyTable { contexts: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Opens a context for `img_id`, or validates a duplicate Begin
    /// against the open one. Refuses a collision against a *different*
    /// transfer with `ChunkIdCollision` (§10.5) rather than overwriting it.
    pub fn begin(&mut self, img_id: ImgId, creator: NodeAddr, count: u16, now: Instant) -> Result<BeginOutcome, MeshError> {
        if let Some(existing) = self.contexts.get(&img_id) {
            if existing.creator == creator && existing.expected_count == count {
                return Ok(BeginOutcome::DuplicateIgnored);
            }
            return Err(MeshError::ChunkIdCollision { img_id });
        }
        if self.contexts.len() >= MAX_CHUNK_CONTEXTS {
            self.evict_oldest();
        }
        self.contexts.insert(
            img_id,
            ChunkContext {
                creator,
                expected_count: count,
                received: BTreeMap::new(),
                opened_at: now,
            },
        );
        Ok(BeginOutcome::Opened)
    }

    /// Inserts one chunk item's bytes. Returns `true` if a matching open
    /// context accepted it; a chunk for an unknown `img_id` is dropped
    /// (§4.4: "not buffered against a future Begin").
    pub fn insert_item(&mut self, img_id: ImgId, index: u16, bytes: &[u8]) -> bool {
        match self.contexts.get_mut(&img_id) {
            Some(ctx) if index < ctx.expected_count => {
                ctx.received.insert(index, bytes.to_vec());
                true
            }
            _ => false,
        }
    }

    /// Computes the sorted missing-index list for an open context. `None`
    /// if the context doesn't exist (an End for an unknown or
    /// already-cleared id).
    pub fn missing_indices(&self, img_id: ImgId) -> Option<Vec<u16>> {
        self.contexts.get(&img_id).map(|c| c.missing())
    }

    /// If the context for `img_id` exists and is complete, removes it and
    /// returns the reassembled bytes in ascending index order (§4.4's
    /// delivery barrier: this is the only path that yields bytes upward,
    /// and it clears the context exactly once).
    pub fn try_complete(&mut self, img_id: ImgId) -> Option<Vec<u8>> {
        let complete = self.contexts.get(&img_id).map(|c| c.is_complete()).unwrap_or(false);
        if !complete {
            return None;
        }
        self.contexts.remove(&img_id).map(|c| c.reassemble())
    }

    /// Evicts contexts older than `CONTEXT_MAX_AGE`, for the periodic
    /// sweep (§4.10).
    pub fn sweep(&mut self, now: Instant) {
        self.contexts.retain(|_, c| now.saturating_duration_since(c.opened_at) < CONTEXT_MAX_AGE);
    }

    fn evict_oldest(&mut self) {
        if let Some((&oldest_id, _)) = self.contexts.iter().min_by_key(|(_, c)| c.opened_at) {
            self.contexts.remove(&oldest_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_exactly_one_chunk_at_two_hundred_bytes() {
        let blob = vec![1u8; 200];
        let chunks = split_into_chunks(&blob);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn splits_two_hundred_one_bytes_into_two_chunks() {
        let blob = vec![1u8; 201];
        let chunks = split_into_chunks(&blob);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 200);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn chunk_item_round_trips() {
        let img_id = [b'A', b'B', b'C'];
        let encoded = encode_chunk_item(img_id, 257, &[9, 9, 9]);
        let (id, index, bytes) = decode_chunk_item(&encoded).unwrap();
        assert_eq!(id, img_id);
        assert_eq!(index, 257);
        assert_eq!(bytes, &[9, 9, 9]);
    }

    #[test]
    fn begin_and_end_payloads_round_trip() {
        let img_id = [b'X', b'Y', b'Z'];
        let begin = encode_begin_payload(img_id, 123456, 3);
        assert_eq!(decode_begin_payload(&begin).unwrap(), (img_id, 123456, 3));
        let end = encode_end_payload(img_id, 654321);
        assert_eq!(decode_end_payload(&end).unwrap(), (img_id, 654321));
    }

    #[test]
    fn reassembles_in_index_order_after_out_of_order_delivery() {
        let mut table = ReassemblyTable::new();
        let img_id = [b'A', b'A', b'A'];
        let now = Instant::from_millis(0);
        table.begin(img_id, 5, 3, now).unwrap();
        table.insert_item(img_id, 2, b"ghi");
        table.insert_item(img_id, 0, b"abc");
        table.insert_item(img_id, 1, b"def");
        assert_eq!(table.missing_indices(img_id), Some(vec![]));
        let blob = table.try_complete(img_id).unwrap();
        assert_eq!(blob, b"abcdefghi");
        assert!(table.missing_indices(img_id).is_none());
    }

    #[test]
    fn missing_indices_reported_while_incomplete() {
        let mut table = ReassemblyTable::new();
        let img_id = [b'B', b'B', b'B'];
        let now = Instant::from_millis(0);
        table.begin(img_id, 1, 3, now).unwrap();
        table.insert_item(img_id, 0, b"a");
        assert_eq!(table.missing_indices(img_id), Some(vec![1, 2]));
        assert!(table.try_complete(img_id).is_none());
    }

    #[test]
    fn duplicate_begin_with_matching_fields_is_idempotent() {
        let mut table = ReassemblyTable::new();
        let img_id = [b'C', b'C', b'C'];
        let now = Instant::from_millis(0);
        assert_eq!(table.begin(img_id, 1, 2, now).unwrap(), BeginOutcome::Opened);
        table.insert_item(img_id, 0, b"x");
        assert_eq!(table.begin(img_id, 1, 2, now).unwrap(), BeginOutcome::DuplicateIgnored);
        // the retained partial state survives the duplicate Begin
        assert_eq!(table.missing_indices(img_id), Some(vec![1]));
    }

    #[test]
    fn begin_collision_with_different_transfer_is_refused() {
        let mut table = ReassemblyTable::new();
        let img_id = [b'D', b'D', b'D'];
        let now = Instant::from_millis(0);
        table.begin(img_id, 1, 2, now).unwrap();
        let err = table.begin(img_id, 9, 5, now).unwrap_err();
        assert!(matches!(err, MeshError::ChunkIdCollision { img_id: id } if id == img_id));
    }

    #[test]
    fn chunk_item_for_unknown_id_is_dropped() {
        let mut table = ReassemblyTable::new();
        assert!(!table.insert_item([b'E', b'E', b'E'], 0, b"x"));
    }

    #[test]
    fn sweep_evicts_stale_contexts() {
        let mut table = ReassemblyTable::new();
        let img_id = [b'F', b'F', b'F'];
        table.begin(img_id, 1, 2, Instant::from_millis(0)).unwrap();
        table.sweep(Instant::from_secs(1) + CONTEXT_MAX_AGE);
        assert!(table.missing_indices(img_id).is_none());
    }
}
