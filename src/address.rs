//! Node addressing (C1/C3).
//!
//! A node address is a single octet. The byte `'*'` (0x2A) is a reserved
//! sentinel meaning "broadcast" rather than a real device.

use std::fmt;

/// A single-octet mesh address.
pub type NodeAddr = u8;

/// Reserved broadcast address, per §3.
pub const BROADCAST: NodeAddr = b'*';

/// True if `addr` is the broadcast sentinel rather than a real device.
pub fn is_broadcast(addr: NodeAddr) -> bool {
    addr == BROADCAST
}

/// The small, hard-coded registry of addresses a device may be provisioned
/// with, plus which of them are command-center addresses.
///
/// Grounded on `netrajaal/main.py`'s `COMMAN_CENTER_ADDRS` list: a fixed,
/// preshared set of addresses rather than anything discovered at runtime.
#[derive(Debug, Clone, Default)]
pub struct AddressRegistry {
    command_centers: Vec<NodeAddr>,
}

impl AddressRegistry {
    pub fn new(command_centers: Vec<NodeAddr>) -> Self {
        Self { command_centers }
    }

    pub fn is_command_center(&self, addr: NodeAddr) -> bool {
        self.command_centers.contains(&addr)
    }

    pub fn command_centers(&self) -> &[NodeAddr] {
        &self.command_centers
    }
}

/// Wraps an address for display, rendering the broadcast sentinel as `*`
/// instead of its numeric value.
pub struct DisplayAddr(pub NodeAddr);

impl fmt::Display for DisplayAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_broadcast(self.0) {
            write!(f, "*")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
