//! Periodic tasks (C11, §4.8): timing constants, jitter, the heartbeat
//! status record, and the consecutive-failure counter that drives a
//! radio reset.
//!
//! The cooperative loops themselves (scan beacon, heartbeat, path
//! dissemination, memory sweep) are `Node` methods spawned onto the
//! executor, since each needs the radio, the reliable-send path and the
//! buffer manager together; this module holds the pure scheduling and
//! encoding logic those loops consult.
//!
//! Grounded on `netrajaal/main.py`'s periodic-task constants and
//! `periodic_memory_cleanup`/heartbeat-failure handling, with the status
//! record's field list taken from `device.py`'s heartbeat payload
//! assembly.

use embassy_time::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fast scan-beacon interval used for the first `SCAN_FAST_ROUNDS`
/// broadcasts after boot, so a freshly-powered node's neighbors are
/// discovered quickly (§4.8).
pub const SCAN_FAST_INTERVAL: Duration = Duration::from_secs(30);
pub const SCAN_FAST_ROUNDS: u32 = 5;
/// Steady-state scan interval once the fast rounds are exhausted.
pub const SCAN_SLOW_INTERVAL: Duration = Duration::from_secs(20 * 60);

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const MEMORY_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const VALIDATION_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Jitter applied to the slower periodic intervals, as a fraction of the
/// base interval (§4.8: "jittered").
pub const JITTER_FRACTION: f64 = 0.1;

/// Consecutive reliable-send failures on the heartbeat path before the
/// radio is reinitialized (§4.8, §10.7; the original MicroPython uses a
/// small fixed constant, named here).
pub const RADIO_FAULT_THRESHOLD: u32 = 5;

/// The interval a scan beacon should use for round `round` (0-based),
/// per the fast-then-slow schedule in §4.8.
pub fn scan_interval_for_round(round: u32) -> Duration {
    if round < SCAN_FAST_ROUNDS { SCAN_FAST_INTERVAL } else { SCAN_SLOW_INTERVAL }
}

/// Applies `±JITTER_FRACTION` jitter to `base`, using `rng`.
pub fn jittered<R: Rng + ?Sized>(base: Duration, rng: &mut R) -> Duration {
    let base_ms = base.as_millis() as f64;
    let delta = base_ms * JITTER_FRACTION;
    let offset = rng.gen_range(-delta..=delta);
    let jittered_ms = (base_ms + offset).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

/// Tracks consecutive reliable-send failures on the heartbeat path.
/// Grounded on `netrajaal/main.py`'s bare counter-and-reset; wrapped here
/// so the threshold check and the reset are one call each instead of
/// scattered comparisons.
#[derive(Debug, Default)]
pub struct FailureCounter {
    consecutive: u32,
}

impl FailureCounter {
    pub fn new() -> Self {
        FailureCounter { consecutive: 0 }
    }

    /// Records a failure. Returns `true` if the threshold was just
    /// reached (the caller should reset the radio and call
    /// [`FailureCounter::reset`]).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= RADIO_FAULT_THRESHOLD
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}

/// Status record carried in a heartbeat's plaintext body before
/// encryption (§4.8, §10.7). Field list follows the original's heartbeat
/// payload: neighbor count, current path length, running counters, and
/// an optional GPS-staleness indicator populated only when an external
/// GPS probe is wired in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub neighbor_count: u16,
    pub path_len: u16,
    pub images_sent: u32,
    pub events_sent: u32,
    pub free_memory_bytes: Option<u64>,
    pub gps_stale_secs: Option<u64>,
}

impl HeartbeatStatus {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("HeartbeatStatus always serializes")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
