//! Reliable unicast (C6, §4.3): constants and pure backoff/outcome logic.
//!
//! The async retry loop itself lives on `Node` (in `node.rs`), since it
//! needs simultaneous access to the radio, the buffer manager, and the
//! router to keep draining inbound frames (including the very ACK it is
//! waiting for) while it sleeps between attempts — exactly the kind of
//! single-owner, serially-scheduled access §9 describes. This module
//! holds the pieces of that loop that don't need any of that: the timing
//! constants and the pure step function a test can drive without an
//! executor.
//!
//! Grounded on `netrajaal/main.py`'s `send_single_msg` and its
//! `MIN_SLEEP`/`ACK_SLEEP`/`CHUNK_SLEEP` constants.

use embassy_time::Duration;

/// Base inter-frame sleep, per §5's suspension points.
pub const MIN_SLEEP: Duration = Duration::from_millis(100);
/// Base wait between transmit attempts and ACK polls, per §4.3.
pub const ACK_SLEEP: Duration = Duration::from_millis(150);
/// Inter-chunk throttle, per §4.4.
pub const CHUNK_SLEEP: Duration = Duration::from_millis(50);

/// Maximum transmit attempts for a reliable send, per §4.3 step 2.
pub const MAX_SEND_ATTEMPTS: u32 = 3;
/// Maximum ACK polls per attempt, per §4.3 step 3.
pub const MAX_ACK_POLLS: u32 = 8;

/// Outcome of a reliable unicast attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered; `missing` carries the ACK's missing-index list (empty
    /// when fully delivered).
    Delivered { missing: Vec<u16> },
    /// Exhausted the retry budget without an ACK.
    TimedOut,
}

/// Computes the backoff delay for the `poll_index`-th (0-based) ACK poll
/// within one transmit attempt: linear ramp from `ACK_SLEEP` up to
/// `2 * ACK_SLEEP`, per §4.3's "increasing backoff (linear up to 2x the
/// base)".
pub fn ack_poll_backoff(poll_index: u32) -> Duration {
    let span = MAX_ACK_POLLS.saturating_sub(1).max(1);
    let step = poll_index.min(MAX_ACK_POLLS - 1);
    ACK_SLEEP + (ACK_SLEEP * step) / span
}
