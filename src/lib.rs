//! Core mesh protocol library, independent of the entry-point binary.
//!
//! One file or directory per concern, re-exported here the way
//! `control::mod.rs` re-exports its own submodules, so `main.rs` only
//! needs `watchmen_mesh_core::...`.

pub mod ack;
pub mod adapters;
pub mod address;
pub mod buffers;
pub mod chunker;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mid;
pub mod neighbors;
pub mod node;
pub mod periodic;
pub mod radio;
pub mod reliable;
pub mod router;
pub mod txlock;

pub use address::{AddressRegistry, NodeAddr, BROADCAST};
pub use config::NodeConfig;
pub use error::MeshError;
pub use mid::{MessageId, MessageType};
pub use node::Node;
pub use radio::RadioDevice;
