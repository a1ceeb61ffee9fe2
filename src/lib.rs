//! # handoff-pipe
//!
//! Unix pipe transport that hands open connection handles from one process
//! to another.
//!
//! A supervisor accepts a connection and passes it to a worker over a local
//! packet socket. The channel carries ordinary data and, interleaved, control
//! records that announce "a handle accompanies this chunk". Each write is
//! read back as its own chunk. The receiver gets exactly one [`ReadEvent`]
//! per chunk, with the handle attached to the data it arrived with.
//!
//! ## Architecture
//!
//! - **Transport** ([`transport`]): native Unix packet socket, `SCM_RIGHTS` I/O
//! - **Control** ([`control`]): JSON `NODE_HANDLE` records
//! - **Demultiplexer** ([`demux`]): raw chunk → unified event
//! - **Pipe** ([`PipeTransport`]): lifecycle and write path
//!
//! ## Example
//!
//! ```ignore
//! use handoff_pipe::{HandleType, PipeTransport};
//!
//! // Supervisor
//! let mut pipe = PipeTransport::builder().ipc(true).build();
//! pipe.create(3)?;
//! let mut worker = tokio::process::Command::new("./worker");
//! pipe.attach_to_async(&mut worker)?;
//! let _child = worker.spawn()?;
//! pipe.close_downstream();
//!
//! let (conn, _) = listener.accept()?;
//! pipe.send_handle(&conn, HandleType::Socket).await?;
//! ```

pub mod control;
pub mod demux;
pub mod error;
pub mod handle;
pub mod transport;

mod config;
mod pipe;
mod spawn;

pub use config::{PipeConfig, DEFAULT_CHANNEL_ENV, DEFAULT_MAX_FDS_PER_READ, DEFAULT_READ_BUFFER_SIZE};
pub use control::HandleType;
pub use demux::{HandleDemultiplexer, ReadEvent};
pub use error::HandoffError;
pub use handle::{HandleFactory, TcpHandle, TcpHandleFactory};
pub use pipe::{OpStatus, PipeBuilder, PipeTransport};
pub use spawn::{attach_channel, attach_channel_async};
