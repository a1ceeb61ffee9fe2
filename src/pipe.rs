//! Pipe transport and builder.
//!
//! [`PipeTransport`] is what the embedding application talks to. It owns a
//! [`NativePipe`] and, in IPC mode only, a [`HandleDemultiplexer`] that turns
//! each raw chunk into a [`ReadEvent`].
//!
//! # Example
//!
//! ```ignore
//! use handoff_pipe::{HandleType, PipeTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut pipe = PipeTransport::builder().ipc(true).build();
//!     pipe.open_inherited()?;
//!
//!     while let Some(event) = pipe.read().await? {
//!         if let Some(handle) = event.handle {
//!             let stream = handle.into_tokio()?;
//!             // serve the connection...
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use crate::config::PipeConfig;
use crate::control::{ControlMessage, HandleType};
use crate::demux::{HandleDemultiplexer, ReadEvent};
use crate::error::{HandoffError, Result};
use crate::handle::{HandleFactory, TcpHandleFactory};
use crate::transport::NativePipe;

/// Status of operations kept only for interface compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// Accepted; nothing to do.
    Ok,
    /// Not implemented by this transport.
    NotImplemented,
}

impl OpStatus {
    /// Integer status code: `0` or `-ENOSYS`.
    pub fn code(&self) -> i32 {
        match self {
            OpStatus::Ok => 0,
            OpStatus::NotImplemented => -libc::ENOSYS,
        }
    }
}

/// Builder for a [`PipeTransport`].
pub struct PipeBuilder<F = TcpHandleFactory> {
    config: PipeConfig,
    factory: F,
}

impl PipeBuilder<TcpHandleFactory> {
    /// Create a builder with default configuration (IPC off).
    pub fn new() -> Self {
        Self {
            config: PipeConfig::default(),
            factory: TcpHandleFactory,
        }
    }
}

impl Default for PipeBuilder<TcpHandleFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: HandleFactory> PipeBuilder<F> {
    /// Enable or disable handle transfer.
    pub fn ipc(mut self, enabled: bool) -> Self {
        self.config.ipc = enabled;
        self
    }

    /// Set the per-read buffer size.
    ///
    /// Default: 64 KiB
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set how many descriptors a single read accepts.
    ///
    /// Default: 4
    pub fn max_fds_per_read(mut self, count: usize) -> Self {
        self.config.max_fds_per_read = count;
        self
    }

    /// Set the environment variable read by `open_inherited`.
    ///
    /// Default: `HANDOFF_CHANNEL_FD`
    pub fn channel_env(mut self, name: &str) -> Self {
        self.config.channel_env = name.to_string();
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: PipeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different handle factory.
    pub fn factory<G: HandleFactory>(self, factory: G) -> PipeBuilder<G> {
        PipeBuilder {
            config: self.config,
            factory,
        }
    }

    /// Build a closed transport.
    pub fn build(self) -> PipeTransport<F> {
        let demux = self
            .config
            .ipc
            .then(|| HandleDemultiplexer::new(self.factory));
        PipeTransport {
            native: NativePipe::new(&self.config),
            config: self.config,
            demux,
        }
    }
}

/// Message pipe that can carry connection handles.
///
/// Every method takes `&self`. Concurrent writes are serialized so each
/// message goes out whole; concurrent reads each get a distinct chunk.
pub struct PipeTransport<F: HandleFactory = TcpHandleFactory> {
    config: PipeConfig,
    native: NativePipe,
    /// Installed only in IPC mode.
    demux: Option<HandleDemultiplexer<F>>,
}

impl PipeTransport<TcpHandleFactory> {
    /// Create a builder.
    pub fn builder() -> PipeBuilder<TcpHandleFactory> {
        PipeBuilder::new()
    }

    /// Create a closed transport with default settings.
    pub fn new(ipc: bool) -> Self {
        Self::builder().ipc(ipc).build()
    }
}

impl<F: HandleFactory> PipeTransport<F> {
    /// Whether handle transfer is enabled.
    #[inline]
    pub fn is_ipc(&self) -> bool {
        self.demux.is_some()
    }

    /// Active configuration.
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Whether the pipe is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.native.is_open()
    }

    /// Create an upstream/downstream pair; see [`NativePipe::create`].
    pub fn create(&mut self, downstream_fd: RawFd) -> Result<()> {
        self.native.create(downstream_fd)
    }

    /// Open on an existing packet socket descriptor, readable and writable.
    ///
    /// Use [`socket_pair`](crate::transport::socket_pair) or the downstream
    /// end of [`create`](Self::create); stream sockets are refused.
    pub fn open(&mut self, fd: OwnedFd) -> Result<()> {
        self.native.open(fd)
    }

    /// Open the descriptor advertised in the configured environment variable.
    ///
    /// The variable must hold a descriptor number this process inherited and
    /// nothing else owns; the transport takes ownership of it.
    pub fn open_inherited(&mut self) -> Result<()> {
        let fd = inherited_fd(&self.config.channel_env)?;
        // SAFETY: the parent installed `fd` for us and nothing else in this
        // process claims it; see `spawn::attach_channel`.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        self.open(fd)
    }

    /// Release the downstream side only.
    pub fn close_downstream(&mut self) {
        self.native.close_downstream();
    }

    /// Release both sides.
    pub fn close(&mut self) {
        self.native.close();
    }

    /// Upstream end, after `create`.
    pub fn upstream(&self) -> Option<BorrowedFd<'_>> {
        self.native.upstream()
    }

    /// Downstream end, after `create` and until `close_downstream`.
    pub fn downstream(&self) -> Option<BorrowedFd<'_>> {
        self.native.downstream()
    }

    /// Descriptor number requested for the downstream end.
    pub fn downstream_target(&self) -> Option<RawFd> {
        self.native.downstream_target()
    }

    /// Write a UTF-8 string, optionally passing a handle alongside it.
    ///
    /// Without a handle this is a plain stream write. With one, the handle's
    /// descriptor is attached to the written bytes; the receiver expects
    /// `data` to be a control message.
    pub async fn write(&self, data: &str, handle: Option<BorrowedFd<'_>>) -> Result<()> {
        match handle {
            None => self.native.write_all(data.as_bytes()).await,
            Some(fd) => self.native.write_with_fd(data.as_bytes(), fd).await,
        }
    }

    /// Plain binary write.
    pub async fn write_buffer(&self, data: &[u8]) -> Result<()> {
        self.native.write_all(data).await
    }

    /// Hand a connection to the peer.
    ///
    /// Sends `{"cmd":"NODE_HANDLE","type":...}` with the handle's descriptor
    /// attached. The local copy stays open; close it once the peer has it.
    pub async fn send_handle(&self, handle: &impl AsFd, kind: HandleType) -> Result<()> {
        if !kind.is_known() {
            return Err(HandoffError::Protocol(
                "cannot send a handle of unknown type".into(),
            ));
        }
        let message = ControlMessage::node_handle(kind).to_json()?;
        self.write(&message, Some(handle.as_fd())).await
    }

    /// Blocking mode toggle. Accepted and ignored.
    pub fn set_blocking(&self, blocking: bool) -> OpStatus {
        tracing::trace!("set_blocking({}) ignored", blocking);
        OpStatus::Ok
    }

    /// Not implemented by this transport.
    pub fn bind(&self) -> OpStatus {
        tracing::debug!("Pipe.bind");
        OpStatus::NotImplemented
    }

    /// Not implemented by this transport.
    pub fn listen(&self) -> OpStatus {
        tracing::debug!("Pipe.listen");
        OpStatus::NotImplemented
    }

    /// Not implemented by this transport.
    pub fn connect(&self) -> OpStatus {
        tracing::debug!("Pipe.connect");
        OpStatus::NotImplemented
    }

    /// Read the next event. `Ok(None)` at end of stream.
    ///
    /// In IPC mode each chunk goes through the demultiplexer. Otherwise
    /// every event is data-only.
    pub async fn read(&self) -> Result<Option<ReadEvent<F::Handle>>> {
        let Some(chunk) = self.native.read_chunk().await? else {
            return Ok(None);
        };
        match &self.demux {
            Some(demux) => demux.demux(chunk).map(Some),
            None => Ok(Some(ReadEvent::data_only(chunk.buffer))),
        }
    }

    /// Read until end of stream, handing every event to `on_read`.
    ///
    /// Returns the first error; a protocol violation ends the loop.
    pub async fn read_loop<C>(&self, mut on_read: C) -> Result<()>
    where
        C: FnMut(ReadEvent<F::Handle>),
    {
        loop {
            match self.read().await {
                Ok(Some(event)) => on_read(event),
                Ok(None) => return Ok(()),
                Err(e) => {
                    tracing::error!("Read loop error: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

fn inherited_fd(env_name: &str) -> Result<RawFd> {
    let value = std::env::var(env_name)
        .map_err(|_| HandoffError::Protocol(format!("{} is not set", env_name)))?;
    let fd: RawFd = value
        .trim()
        .parse()
        .map_err(|_| HandoffError::Protocol(format!("{} is not a descriptor: {:?}", env_name, value)))?;
    if fd < 0 {
        return Err(HandoffError::Protocol(format!(
            "{} is not a descriptor: {:?}",
            env_name, value
        )));
    }
    Ok(fd)
}
