//! Transmit-mode lock (C8, §4.5): at most one large-transfer conversation
//! active per node at a time.
//!
//! Grounded on `netrajaal/main.py`'s `acquire_image_lock`/
//! `release_image_lock`, which set a boolean flag and auto-release it
//! after a fixed wall-clock timeout. Here the flag becomes a small
//! `Option<Held>` record so `release` can check the caller actually owns
//! what it's releasing.

use crate::address::NodeAddr;
use embassy_time::{Duration, Instant};

/// Watchdog timeout: a stuck holder is force-released after this long,
/// per §3 ("~120-180s") and §4.5.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Held {
    peer: NodeAddr,
    data_id: [u8; 3],
    acquired_at: Instant,
}

/// Single-owner mutual-exclusion gate for large-payload conversations.
#[derive(Debug, Default)]
pub struct TransmitLock {
    held: Option<Held>,
}

impl TransmitLock {
    pub fn new() -> Self {
        TransmitLock { held: None }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub fn holder(&self) -> Option<(NodeAddr, [u8; 3])> {
        self.held.map(|h| (h.peer, h.data_id))
    }

    /// Attempts to acquire the lock for a transfer with `peer` over
    /// `data_id`. Non-blocking: returns `false` immediately if already
    /// held (§4.5: "the caller must abandon the transfer attempt and
    /// retry later").
    pub fn acquire(&mut self, peer: NodeAddr, data_id: [u8; 3], now: Instant) -> bool {
        if self.held.is_some() {
            return false;
        }
        self.held = Some(Held { peer, data_id, acquired_at: now });
        true
    }

    /// Releases the lock, but only if `peer`/`data_id` match the current
    /// holder; a mismatched release is a no-op (§4.5).
    pub fn release(&mut self, peer: NodeAddr, data_id: [u8; 3]) {
        if let Some(h) = self.held {
            if h.peer == peer && h.data_id == data_id {
                self.held = None;
            }
        }
    }

    /// Force-releases the lock if it has been held longer than
    /// `WATCHDOG_TIMEOUT`, guaranteeing liveness under a lost final ACK
    /// (§4.5, §5 "Cancellation and timeouts").
    pub fn tick_watchdog(&mut self, now: Instant) {
        if let Some(h) = self.held {
            if now.saturating_duration_since(h.acquired_at) >= WATCHDOG_TIMEOUT {
                self.held = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let mut lock = TransmitLock::new();
        let now = Instant::from_millis(0);
        assert!(lock.acquire(1, [b'A', b'B', b'C'], now));
        assert!(!lock.acquire(2, [b'D', b'E', b'F'], now));
    }

    #[test]
    fn release_requires_matching_holder() {
        let mut lock = TransmitLock::new();
        let now = Instant::from_millis(0);
        lock.acquire(1, [b'A', b'B', b'C'], now);
        lock.release(2, [b'A', b'B', b'C']); // wrong peer
        assert!(lock.is_held());
        lock.release(1, [b'X', b'Y', b'Z']); // wrong data_id
        assert!(lock.is_held());
        lock.release(1, [b'A', b'B', b'C']);
        assert!(!lock.is_held());
    }

    #[test]
    fn watchdog_force_releases_after_timeout() {
        let mut lock = TransmitLock::new();
        let start = Instant::from_secs(0);
        lock.acquire(1, [b'A', b'B', b'C'], start);
        lock.tick_watchdog(start + Duration::from_secs(60));
        assert!(lock.is_held(), "not yet past the watchdog timeout");
        lock.tick_watchdog(start + WATCHDOG_TIMEOUT);
        assert!(!lock.is_held(), "watchdog should have force-released");
    }

    #[test]
    fn reacquire_after_release_succeeds() {
        let mut lock = TransmitLock::new();
        let now = Instant::from_millis(0);
        lock.acquire(1, [b'A', b'B', b'C'], now);
        lock.release(1, [b'A', b'B', b'C']);
        assert!(lock.acquire(2, [b'D', b'E', b'F'], now));
    }
}
