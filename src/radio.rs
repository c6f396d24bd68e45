//! Radio driver interface consumed by the core (C3, §6).
//!
//! Talks to hardware through a sender/receiver pair of bounded channels,
//! the same shape `simulation::node_task::node_task` drives against
//! `moonblokz_radio_lib::radio_device_simulator::RadioDevice`. Here the
//! boundary is an explicit trait instead, since the core must run
//! unmodified against a simulator in tests and against real transceiver
//! glue in the field.

use crate::address::NodeAddr;
use async_trait::async_trait;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One inbound frame as handed up by the radio, paired with its sender
/// (the radio knows who it heard this from even before the frame is
/// parsed).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: NodeAddr,
    pub bytes: Vec<u8>,
}

/// Hardware boundary the core drives. One instance is owned per node.
#[async_trait]
pub trait RadioDevice: Send {
    /// Enqueue one frame to `dest`, blocking (from the task's point of
    /// view) until the transceiver has accepted it.
    async fn send(&self, dest: NodeAddr, bytes: &[u8]);

    /// Non-blocking poll for one inbound frame.
    fn try_recv(&self) -> Option<InboundFrame>;

    /// Hard reinitialize, called after repeated heartbeat failures
    /// (`RadioFault`, §7).
    fn reset(&self);
}

/// Capacity of the mock's outbound record: generous enough that scenario
/// tests never block on it.
const MOCK_SENT_LOG_CAPACITY: usize = 4096;

/// In-memory radio for tests, modeling a single shared medium: every
/// `send` is recorded and can be delivered into any paired device's inbox
/// with `MockRadioDevice::deliver_pending_to`, letting tests choose
/// exactly which frames reach which peer and simulate loss by skipping
/// one.
pub struct MockRadioDevice {
    addr: NodeAddr,
    inbox: Mutex<VecDeque<InboundFrame>>,
    sent_log: Mutex<VecDeque<(NodeAddr, Vec<u8>)>>,
    reset_count: Mutex<u32>,
}

impl MockRadioDevice {
    pub fn new(addr: NodeAddr) -> Self {
        MockRadioDevice {
            addr,
            inbox: Mutex::new(VecDeque::new()),
            sent_log: Mutex::new(VecDeque::new()),
            reset_count: Mutex::new(0),
        }
    }

    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Directly injects a frame into this device's inbox, as if it had
    /// just been received over the air from `from`.
    pub fn inject(&self, from: NodeAddr, bytes: Vec<u8>) {
        self.inbox.lock().unwrap().push_back(InboundFrame { from, bytes });
    }

    /// Drains everything this device has sent since the last drain.
    pub fn drain_sent(&self) -> Vec<(NodeAddr, Vec<u8>)> {
        self.sent_log.lock().unwrap().drain(..).collect()
    }

    pub fn reset_count(&self) -> u32 {
        *self.reset_count.lock().unwrap()
    }
}

#[async_trait]
impl RadioDevice for MockRadioDevice {
    async fn send(&self, dest: NodeAddr, bytes: &[u8]) {
        let mut log = self.sent_log.lock().unwrap();
        if log.len() >= MOCK_SENT_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back((dest, bytes.to_vec()));
    }

    fn try_recv(&self) -> Option<InboundFrame> {
        self.inbox.lock().unwrap().pop_front()
    }

    fn reset(&self) {
        *self.reset_count.lock().unwrap() += 1;
    }
}

/// Bounded channel type alias over `embassy_sync::channel::Channel`,
/// sized for a single node's inbound-frame queue. Real hardware backends
/// (outside this crate's scope) can feed frames through a channel of this
/// shape on an interrupt or polling thread.
pub type RadioEventQueue<const N: usize> = Channel<NoopRawMutex, InboundFrame, N>;
