//! Control plane module - the in-band `NODE_HANDLE` record.
//!
//! When a chunk arrives with a descriptor attached, its payload is a JSON
//! control message naming the kind of handle the descriptor represents:
//!
//! ```text
//! { "cmd": "NODE_HANDLE", "type": "net.Socket" | "net.Native" }
//! ```
//!
//! Any other `cmd`, or an unknown `type`, means "no handle for this chunk".

mod message;

pub use message::{ControlMessage, HandleType, NET_NATIVE, NET_SOCKET, NODE_HANDLE};
