//! Monotonic clock and random tag generation (C1).
//!
//! Grounded on `netrajaal/main.py`'s `time_msec`/`get_rand` pair: a
//! monotonic millisecond clock anchored at process start, and a 3-letter
//! uppercase tag used to disambiguate messages. Here the clock rides on
//! `embassy_time::Instant` rather than a hand-rolled tick counter.

use embassy_time::Instant;
use rand::Rng;

/// Milliseconds since an arbitrary but fixed epoch (process start on real
/// hardware). Only differences between two `epoch_ms()` calls are
/// meaningful.
pub fn epoch_ms() -> u64 {
    Instant::now().as_millis()
}

/// Generates a fresh 3-letter uppercase ASCII tag, used as the random
/// suffix of a `MessageId`.
pub fn random_tag<R: Rng + ?Sized>(rng: &mut R) -> [u8; 3] {
    let mut tag = [0u8; 3];
    for slot in tag.iter_mut() {
        *slot = b'A' + rng.gen_range(0..26);
    }
    tag
}
