//! Transport module - the native Unix pipe.
//!
//! Provides:
//! - [`NativePipe`]: socket ownership, lifecycle, raw reads and writes
//! - [`RawChunk`]: one `(buffer, fd)` read
//! - [`socket_pair`]: the packet socket pair a pipe runs over
//! - `SCM_RIGHTS` ancillary I/O used by both

mod ancillary;
mod chunk;
mod pipe;
mod socket;

pub use chunk::{RawChunk, NO_FD};
pub use pipe::NativePipe;
pub use socket::socket_pair;
