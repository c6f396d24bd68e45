//! Message router (C10, §4.7): dispatch table for inbound frames.
//!
//! `dispatch` is a pure function: given a decoded frame and mutable
//! access to the neighbor/path and reassembly tables, it applies the
//! local-state mutations those types call for (learning a neighbor,
//! opening/filling a chunk context) and returns a `RouterOutcome`
//! describing what, if anything, `Node` must still do asynchronously —
//! send an ack, forward a frame along the next hop, or hand a payload to
//! an uploader. No I/O happens here.
//!
//! Grounded on `device.py`'s `process_msg`/`propogate_hb`/`propogate_image`
//! dispatch chain.

use crate::address::NodeAddr;
use crate::chunker::{self, ReassemblyTable};
use crate::error::MeshError;
use crate::mid::{MessageId, MessageType};
use crate::neighbors::NeighborTable;
use embassy_time::Instant;
use std::collections::VecDeque;

/// Capacity of the command-center's recently-delivered dedupe set (§10.6).
pub const RECENTLY_DELIVERED_CAPACITY: usize = 128;

/// Bounded FIFO of `(creator, tag)` pairs the command center has already
/// handed to the uploader, so a retransmitted `H`/`T` (resent after its
/// ack was lost) isn't uploaded twice.
#[derive(Debug, Default)]
pub struct RecentlyDelivered {
    entries: VecDeque<(NodeAddr, [u8; 3])>,
}

impl RecentlyDelivered {
    pub fn new() -> Self {
        RecentlyDelivered { entries: VecDeque::new() }
    }

    /// Returns `true` if `(creator, tag)` was already present (a
    /// duplicate); otherwise records it and returns `false`.
    pub fn check_and_insert(&mut self, creator: NodeAddr, tag: [u8; 3]) -> bool {
        if self.entries.iter().any(|e| *e == (creator, tag)) {
            return true;
        }
        if self.entries.len() >= RECENTLY_DELIVERED_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((creator, tag));
        false
    }
}

/// What `Node` must still do for one dispatched frame, beyond the local
/// table mutations `dispatch` already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Re-send `payload` under a fresh MID toward `next_hop`, preserving
    /// `creator` and `msg_type`.
    ForwardFrame { msg_type: MessageType, creator: NodeAddr, payload: Vec<u8>, next_hop: NodeAddr },
    /// Re-burst a reassembled image toward `next_hop` via a fresh
    /// Begin/Item/End sequence.
    ForwardImage { creator: NodeAddr, bytes: Vec<u8>, next_hop: NodeAddr },
    UploadHeartbeat { creator: NodeAddr, payload: Vec<u8> },
    UploadEventText { creator: NodeAddr, payload: Vec<u8> },
    UploadImage { creator: NodeAddr, bytes: Vec<u8> },
    /// Re-emit a shortest-path announce to `targets`, each carrying
    /// `announced_path`.
    ReemitPath { targets: Vec<NodeAddr>, announced_path: Vec<NodeAddr> },
    /// Terminal: the frame is dropped with no further effect, logged by
    /// the caller at the given level.
    Drop { reason: &'static str },
}

/// Everything `dispatch` decided for one inbound frame: an optional ack
/// to send back to the sender, and an optional follow-up action.
#[derive(Debug, Clone, Default)]
pub struct RouterOutcome {
    /// `(target MID, missing-index list)` to ack, if this type is acked.
    pub ack: Option<(MessageId, Vec<u16>)>,
    pub action: Option<RouterAction>,
}

/// Dispatches one inbound, already-addressed-to-us-or-broadcast frame.
///
/// `self_addr`/`is_command_center` describe this node; `neighbors` and
/// `reassembly` are mutated in place as the dispatch table in §4.7
/// requires; `recently_delivered` gates duplicate uploads at the command
/// center (§10.6, a no-op table elsewhere).
pub fn dispatch(
    mid: MessageId,
    payload: &[u8],
    self_addr: NodeAddr,
    is_command_center: bool,
    neighbors: &mut NeighborTable,
    reassembly: &mut ReassemblyTable,
    recently_delivered: &mut RecentlyDelivered,
    now: Instant,
) -> RouterOutcome {
    match mid.msg_type {
        MessageType::NeighborBeacon => {
            neighbors.learn_neighbor(mid.creator);
            RouterOutcome::default()
        }

        MessageType::ValidateNeighbor => RouterOutcome {
            ack: Some((mid, Vec::new())),
            action: None,
        },

        MessageType::ShortestPathAnnounce => {
            let candidate = decode_path(payload);
            if neighbors.try_adopt_path(self_addr, is_command_center, &candidate) {
                let targets = neighbors.fanout_targets_for(&candidate);
                if targets.is_empty() {
                    return RouterOutcome::default();
                }
                let mut announced_path = Vec::with_capacity(candidate.len() + 1);
                announced_path.push(self_addr);
                announced_path.extend_from_slice(&candidate);
                RouterOutcome {
                    ack: None,
                    action: Some(RouterAction::ReemitPath { targets, announced_path }),
                }
            } else {
                RouterOutcome::default()
            }
        }

        MessageType::Heartbeat => {
            let ack = Some((mid, Vec::new()));
            let action = if is_command_center {
                if recently_delivered.check_and_insert(mid.creator, mid.tag) {
                    None
                } else {
                    Some(RouterAction::UploadHeartbeat { creator: mid.creator, payload: payload.to_vec() })
                }
            } else {
                match neighbors.next_hop() {
                    Some(next_hop) => Some(RouterAction::ForwardFrame {
                        msg_type: MessageType::Heartbeat,
                        creator: mid.creator,
                        payload: payload.to_vec(),
                        next_hop,
                    }),
                    None => Some(RouterAction::Drop { reason: "no route to command center for heartbeat" }),
                }
            };
            RouterOutcome { ack, action }
        }

        MessageType::EventText => {
            let ack = Some((mid, Vec::new()));
            let action = if is_command_center {
                if recently_delivered.check_and_insert(mid.creator, mid.tag) {
                    None
                } else {
                    Some(RouterAction::UploadEventText { creator: mid.creator, payload: payload.to_vec() })
                }
            } else {
                match neighbors.next_hop() {
                    Some(next_hop) => Some(RouterAction::ForwardFrame {
                        msg_type: MessageType::EventText,
                        creator: mid.creator,
                        payload: payload.to_vec(),
                        next_hop,
                    }),
                    None => Some(RouterAction::Drop { reason: "no route to command center for event text" }),
                }
            };
            RouterOutcome { ack, action }
        }

        MessageType::BeginOfChunks => {
            match chunker::decode_begin_payload(payload) {
                Ok((img_id, _epoch_ms, count)) => {
                    if let Err(MeshError::ChunkIdCollision { .. }) = reassembly.begin(img_id, mid.creator, count, now) {
                        return RouterOutcome {
                            ack: Some((mid, Vec::new())),
                            action: Some(RouterAction::Drop { reason: "begin collides with a different open transfer" }),
                        };
                    }
                    RouterOutcome {
                        ack: Some((mid, Vec::new())),
                        action: None,
                    }
                }
                Err(_) => RouterOutcome {
                    ack: Some((mid, Vec::new())),
                    action: Some(RouterAction::Drop { reason: "malformed begin payload" }),
                },
            }
        }

        MessageType::ChunkItem => {
            if let Ok((img_id, index, bytes)) = chunker::decode_chunk_item(payload) {
                reassembly.insert_item(img_id, index, bytes);
            }
            RouterOutcome::default()
        }

        MessageType::EndOfChunks => match chunker::decode_end_payload(payload) {
            Ok((img_id, _epoch_ms)) => match reassembly.missing_indices(img_id) {
                None => RouterOutcome {
                    ack: Some((mid, Vec::new())),
                    action: None,
                },
                Some(missing) if !missing.is_empty() => RouterOutcome {
                    ack: Some((mid, missing)),
                    action: None,
                },
                Some(_) => {
                    let bytes = reassembly.try_complete(img_id).unwrap_or_default();
                    let action = if is_command_center {
                        Some(RouterAction::UploadImage { creator: mid.creator, bytes })
                    } else {
                        match neighbors.next_hop() {
                            Some(next_hop) => Some(RouterAction::ForwardImage { creator: mid.creator, bytes, next_hop }),
                            None => Some(RouterAction::Drop { reason: "no route to command center for image" }),
                        }
                    };
                    RouterOutcome {
                        ack: Some((mid, Vec::new())),
                        action,
                    }
                }
            },
            Err(_) => RouterOutcome {
                ack: Some((mid, Vec::new())),
                action: Some(RouterAction::Drop { reason: "malformed end payload" }),
            },
        },

        MessageType::Acknowledgement => RouterOutcome::default(),
    }
}

/// Encodes a path as the comma-separated decimal address list §4.6 uses
/// for `S` payloads.
pub fn encode_path(path: &[NodeAddr]) -> Vec<u8> {
    path.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(",").into_bytes()
}

/// Decodes a comma-separated address list. Malformed entries are
/// dropped rather than failing the whole parse, since a single corrupt
/// octet shouldn't poison an otherwise usable path.
pub fn decode_path(payload: &[u8]) -> Vec<NodeAddr> {
    let text = String::from_utf8_lossy(payload);
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').filter_map(|s| s.trim().parse::<NodeAddr>().ok()).collect()
}
