//! Core error kinds (§7, §10.2).
//!
//! The core never panics across its public API; every fallible operation
//! returns `Result<_, MeshError>` or a small tagged outcome. Adapters and
//! the binary shell attach `anyhow` context at their own boundary instead
//! (see `adapters` and `config`), the way `control::client` and
//! `network_task` do around I/O.

use crate::address::NodeAddr;
use crate::mid::MessageId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("malformed frame ({len} bytes): {reason}")]
    ParseError { len: usize, reason: &'static str },

    #[error("encoded frame of {len} bytes exceeds the {max} byte wire limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("transmit-mode lock held by peer {holder}, cannot start a new transfer with {peer}")]
    SendBusy { holder: NodeAddr, peer: NodeAddr },

    #[error("no route to command center while forwarding mid {mid:?}")]
    NoRoute { mid: MessageId },

    #[error("reliable send of mid {mid:?} exhausted its retry budget")]
    AckTimeout { mid: MessageId },

    #[error("end-of-chunks for img_id {img_id:?} arrived with {missing} chunk(s) still missing")]
    ChunkIncomplete { img_id: [u8; 3], missing: usize },

    #[error("radio fault after {consecutive_failures} consecutive heartbeat failures")]
    RadioFault { consecutive_failures: u32 },

    #[error("rsa envelope payload of {len} bytes exceeds the {max} byte limit; wrap bypassed")]
    EnvelopeTooLarge { len: usize, max: usize },

    #[error("begin-of-chunks for img_id {img_id:?} collides with an open, distinct transfer")]
    ChunkIdCollision { img_id: [u8; 3] },

    #[error("configuration error: {0}")]
    ConfigError(String),
}
