//! Buffer manager (C12): bounded FIFOs for sent/recd/unacked traffic with
//! periodic, age-based eviction.
//!
//! Grounded on `netrajaal/main.py`'s `cleanup_old_messages`/
//! `cleanup_chunk_map`: age-threshold eviction first, then a hard size cap
//! enforced FIFO (oldest dropped first) so the bounded stores in §3 can
//! never grow past their configured capacity regardless of traffic.

use crate::mid::MessageId;
use embassy_time::{Duration, Instant};
use std::collections::VecDeque;

/// Entries older than this are evicted from `sent`/`recd` on the sweep.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);
/// `unacked` gets a longer grace period: §3 specifies 2x the default.
pub const UNACKED_MAX_AGE_MULTIPLIER: u32 = 2;

pub const SENT_CAPACITY: usize = 500;
pub const RECD_CAPACITY: usize = 500;
pub const UNACKED_CAPACITY: usize = 100;

/// One logged transmission or reception: the identifying MID, its raw
/// payload, and the timestamp it was logged at.
#[derive(Debug, Clone)]
pub struct LoggedMessage {
    pub mid: MessageId,
    pub payload: Vec<u8>,
    pub at: Instant,
}

/// A bounded, age-evictable FIFO of `LoggedMessage`. Insertion never
/// blocks and never fails; it silently drops the oldest entry to make
/// room once `capacity` is reached, mirroring the "insertion never
/// blocks; trimming happens on the periodic sweep" contract of §4.10 while
/// still holding the hard cap from §8's invariant 4 at all times.
#[derive(Debug)]
pub struct BoundedLog {
    entries: VecDeque<LoggedMessage>,
    capacity: usize,
}

impl BoundedLog {
    pub fn new(capacity: usize) -> Self {
        BoundedLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: LoggedMessage) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest-first iterator, matching the ack-tracker's "scan the
    /// received log newest-first" contract in §4.2.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &LoggedMessage> {
        self.entries.iter().rev()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoggedMessage> {
        self.entries.iter()
    }

    /// Removes and returns the first entry whose MID equals `mid`.
    pub fn remove_by_mid(&mut self, mid: MessageId) -> Option<LoggedMessage> {
        let pos = self.entries.iter().position(|e| e.mid == mid)?;
        self.entries.remove(pos)
    }

    /// Evicts entries older than `max_age` relative to `now`, then (if
    /// still over capacity) the oldest remaining entries, per §4.10's
    /// "by age, then by size" rule.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) {
        self.entries.retain(|e| now.saturating_duration_since(e.at) <= max_age);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Owns the three message logs the router and reliable-send layer
/// consult, and runs the periodic sweep across all of them.
#[derive(Debug)]
pub struct BufferManager {
    pub sent: BoundedLog,
    pub recd: BoundedLog,
    pub unacked: BoundedLog,
}

impl BufferManager {
    pub fn new() -> Self {
        BufferManager {
            sent: BoundedLog::new(SENT_CAPACITY),
            recd: BoundedLog::new(RECD_CAPACITY),
            unacked: BoundedLog::new(UNACKED_CAPACITY),
        }
    }

    /// Runs the memory sweep described in §4.8: age-evict `sent`/`recd` at
    /// `DEFAULT_MAX_AGE`, `unacked` at twice that.
    pub fn sweep(&mut self, now: Instant) {
        self.sent.sweep(now, DEFAULT_MAX_AGE);
        self.recd.sweep(now, DEFAULT_MAX_AGE);
        self.unacked.sweep(now, DEFAULT_MAX_AGE * UNACKED_MAX_AGE_MULTIPLIER);
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mid::MessageType;

    fn msg(tag: u8, at: Instant) -> LoggedMessage {
        LoggedMessage {
            mid: MessageId {
                msg_type: MessageType::Heartbeat,
                creator: 1,
                sender: 1,
                receiver: 2,
                tag: [tag, tag, tag],
            },
            payload: vec![],
            at,
        }
    }

    #[test]
    fn caps_by_size_fifo() {
        let mut log = BoundedLog::new(2);
        log.push(msg(b'A', Instant::from_millis(0)));
        log.push(msg(b'B', Instant::from_millis(1)));
        log.push(msg(b'C', Instant::from_millis(2)));
        assert_eq!(log.len(), 2);
        let tags: Vec<u8> = log.iter().map(|e| e.mid.tag[0]).collect();
        assert_eq!(tags, vec![b'B', b'C']);
    }

    #[test]
    fn sweep_evicts_by_age_then_size() {
        let mut log = BoundedLog::new(10);
        log.push(msg(b'A', Instant::from_secs(0)));
        log.push(msg(b'B', Instant::from_secs(10)));
        log.sweep(Instant::from_secs(3700), DEFAULT_MAX_AGE);
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn remove_by_mid_extracts_single_entry() {
        let mut log = BoundedLog::new(10);
        let m = msg(b'A', Instant::from_millis(0));
        log.push(m.clone());
        log.push(msg(b'B', Instant::from_millis(1)));
        let removed = log.remove_by_mid(m.mid).unwrap();
        assert_eq!(removed.mid.tag, m.mid.tag);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn manager_sweep_respects_unacked_double_age() {
        let mut mgr = BufferManager::new();
        mgr.unacked.push(msg(b'A', Instant::from_secs(0)));
        mgr.sent.push(msg(b'B', Instant::from_secs(0)));
        let now = Instant::from_secs(3700);
        mgr.sweep(now);
        assert_eq!(mgr.sent.len(), 0, "sent ages out past 3600s");
        assert_eq!(mgr.unacked.len(), 1, "unacked tolerates up to 7200s");
    }
}
